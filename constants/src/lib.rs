pub const VENDOR_IDENTIFIER: &str = "Selekt";
pub const DRIVER_SHORT_NAME: &str = "selekt";

// SQL states
pub const SUCCESS: &str = "00000";
pub const GENERAL_ERROR: &str = "HY000";
pub const TIMEOUT_EXPIRED: &str = "HYT00";
pub const FUNCTION_SEQUENCE_ERROR: &str = "HY010";
pub const UNABLE_TO_CONNECT: &str = "08001";
pub const CONNECTION_NOT_OPEN: &str = "08003";
pub const CONNECTION_FAILURE: &str = "08007";
pub const DATA_EXCEPTION: &str = "22000";
pub const STRING_DATA_RIGHT_TRUNCATION: &str = "22001";
pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
pub const INTEGRITY_CONSTRAINT_VIOLATION: &str = "23000";
pub const INVALID_CURSOR_STATE: &str = "24000";
pub const READ_ONLY_SQL_TRANSACTION: &str = "25006";
pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";
pub const TRANSACTION_ROLLBACK: &str = "40000";
pub const SERIALIZATION_FAILURE: &str = "40001";
pub const SYNTAX_OR_ACCESS_RULE_VIOLATION: &str = "42000";
pub const INSUFFICIENT_RESOURCES: &str = "53000";
pub const DISK_FULL: &str = "53100";

// Library defaults
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_BUSY_TIMEOUT_MILLIS: u64 = 5_000;
pub const DEFAULT_IDLE_TIMEOUT_MILLIS: u64 = 60_000;
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 64;
