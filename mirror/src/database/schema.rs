//! Database schema definitions

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    miner TEXT NOT NULL,
    reward INTEGER NOT NULL,
    transaction_count INTEGER NOT NULL,
    proposals_count INTEGER NOT NULL,
    uncles_count INTEGER NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    proposals TEXT NOT NULL,
    uncles TEXT NOT NULL,
    version INTEGER NOT NULL,
    parent_hash TEXT NOT NULL,
    compact_target INTEGER NOT NULL,
    nonce TEXT NOT NULL,
    epoch INTEGER NOT NULL,
    dao TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_BLOCKS_NUMBER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks(number)";

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'PROPOSED', 'COMMITTED')),
    fee INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    cycles INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    witnesses TEXT NOT NULL,
    block_id INTEGER REFERENCES blocks(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_TRANSACTIONS_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status)";

pub const CREATE_TRANSACTIONS_BLOCK_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_id ON transactions(block_id)";

pub const CREATE_SCRIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scripts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code_hash TEXT NOT NULL,
    hash_type TEXT NOT NULL,
    args TEXT NOT NULL,
    UNIQUE (code_hash, hash_type, args)
)
"#;

pub const CREATE_OUTPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    output_index INTEGER NOT NULL,
    capacity INTEGER NOT NULL,
    lock_script_id INTEGER NOT NULL REFERENCES scripts(id),
    type_script_id INTEGER REFERENCES scripts(id),
    data TEXT NOT NULL,
    UNIQUE (tx_hash, output_index)
)
"#;

pub const CREATE_INPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS inputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    input_index INTEGER NOT NULL,
    previous_tx_hash TEXT NOT NULL,
    previous_index INTEGER NOT NULL,
    since TEXT NOT NULL
)
"#;

pub const CREATE_INPUTS_TX_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_inputs_tx_hash ON inputs(tx_hash)";

pub const CREATE_INPUTS_PREVIOUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_inputs_previous ON inputs(previous_tx_hash, previous_index)";

pub const CREATE_CELL_DEPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cell_deps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    out_point_tx_hash TEXT NOT NULL,
    out_point_index INTEGER NOT NULL,
    dep_type TEXT NOT NULL
)
"#;

pub const CREATE_CELL_DEPS_TX_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cell_deps_tx_hash ON cell_deps(tx_hash)";

pub const CREATE_HEADER_DEPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS header_deps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash TEXT NOT NULL REFERENCES transactions(hash),
    block_hash TEXT NOT NULL
)
"#;

pub const CREATE_HEADER_DEPS_TX_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_header_deps_tx_hash ON header_deps(tx_hash)";

/// Statements applied in order by `Database::migrate`.
pub const MIGRATIONS: &[&str] = &[
    CREATE_BLOCKS_TABLE,
    CREATE_BLOCKS_NUMBER_INDEX,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_TRANSACTIONS_STATUS_INDEX,
    CREATE_TRANSACTIONS_BLOCK_INDEX,
    CREATE_SCRIPTS_TABLE,
    CREATE_OUTPUTS_TABLE,
    CREATE_INPUTS_TABLE,
    CREATE_INPUTS_TX_INDEX,
    CREATE_INPUTS_PREVIOUS_INDEX,
    CREATE_CELL_DEPS_TABLE,
    CREATE_CELL_DEPS_TX_INDEX,
    CREATE_HEADER_DEPS_TABLE,
    CREATE_HEADER_DEPS_TX_INDEX,
];
