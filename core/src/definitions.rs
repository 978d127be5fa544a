use num_derive::FromPrimitive;

/// Primary result codes as reported by the engine. The low-order byte of any
/// extended code is one of these.
#[allow(non_camel_case_types)]
#[repr(i32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
pub enum PrimaryCode {
    SQLITE_OK = 0,
    SQLITE_ERROR = 1,
    SQLITE_INTERNAL = 2,
    SQLITE_PERM = 3,
    SQLITE_ABORT = 4,
    SQLITE_BUSY = 5,
    SQLITE_LOCKED = 6,
    SQLITE_NOMEM = 7,
    SQLITE_READONLY = 8,
    SQLITE_INTERRUPT = 9,
    SQLITE_IOERR = 10,
    SQLITE_CORRUPT = 11,
    SQLITE_NOTFOUND = 12,
    SQLITE_FULL = 13,
    SQLITE_CANTOPEN = 14,
    SQLITE_PROTOCOL = 15,
    SQLITE_EMPTY = 16,
    SQLITE_SCHEMA = 17,
    SQLITE_TOOBIG = 18,
    SQLITE_CONSTRAINT = 19,
    SQLITE_MISMATCH = 20,
    SQLITE_MISUSE = 21,
    SQLITE_NOLFS = 22,
    SQLITE_AUTH = 23,
    SQLITE_FORMAT = 24,
    SQLITE_RANGE = 25,
    SQLITE_NOTADB = 26,
    SQLITE_NOTICE = 27,
    SQLITE_WARNING = 28,
    SQLITE_ROW = 100,
    SQLITE_DONE = 101,
}

/// Extended result codes. An extended code carries its primary code in the low
/// byte, so `extended & 0xff` recovers the `PrimaryCode` discriminant.
#[allow(non_camel_case_types)]
#[repr(i32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
pub enum ExtendedCode {
    SQLITE_OK_LOAD_PERMANENTLY = 256,
    SQLITE_ERROR_MISSING_COLLSEQ = 257,
    SQLITE_ERROR_RETRY = 513,
    SQLITE_ERROR_SNAPSHOT = 769,
    SQLITE_ABORT_ROLLBACK = 516,
    SQLITE_BUSY_RECOVERY = 261,
    SQLITE_BUSY_SNAPSHOT = 517,
    SQLITE_BUSY_TIMEOUT = 773,
    SQLITE_LOCKED_SHAREDCACHE = 262,
    SQLITE_LOCKED_VTAB = 518,
    SQLITE_READONLY_RECOVERY = 264,
    SQLITE_READONLY_CANTLOCK = 520,
    SQLITE_READONLY_ROLLBACK = 776,
    SQLITE_READONLY_DBMOVED = 1032,
    SQLITE_READONLY_CANTINIT = 1288,
    SQLITE_READONLY_DIRECTORY = 1544,
    SQLITE_IOERR_READ = 266,
    SQLITE_IOERR_SHORT_READ = 522,
    SQLITE_IOERR_WRITE = 778,
    SQLITE_IOERR_FSYNC = 1034,
    SQLITE_IOERR_DIR_FSYNC = 1290,
    SQLITE_IOERR_TRUNCATE = 1546,
    SQLITE_IOERR_FSTAT = 1802,
    SQLITE_IOERR_UNLOCK = 2058,
    SQLITE_IOERR_RDLOCK = 2314,
    SQLITE_IOERR_DELETE = 2570,
    SQLITE_IOERR_BLOCKED = 2826,
    SQLITE_IOERR_NOMEM = 3082,
    SQLITE_IOERR_ACCESS = 3338,
    SQLITE_IOERR_CHECKRESERVEDLOCK = 3594,
    SQLITE_IOERR_LOCK = 3850,
    SQLITE_IOERR_CLOSE = 4106,
    SQLITE_IOERR_SHMOPEN = 4618,
    SQLITE_IOERR_SHMSIZE = 4874,
    SQLITE_IOERR_SHMLOCK = 5130,
    SQLITE_IOERR_SHMMAP = 5386,
    SQLITE_IOERR_SEEK = 5642,
    SQLITE_IOERR_DELETE_NOENT = 5898,
    SQLITE_IOERR_MMAP = 6154,
    SQLITE_IOERR_GETTEMPPATH = 6410,
    SQLITE_IOERR_CONVPATH = 6666,
    SQLITE_CORRUPT_VTAB = 267,
    SQLITE_CORRUPT_SEQUENCE = 523,
    SQLITE_CORRUPT_INDEX = 779,
    SQLITE_CANTOPEN_NOTEMPDIR = 270,
    SQLITE_CANTOPEN_ISDIR = 526,
    SQLITE_CANTOPEN_FULLPATH = 782,
    SQLITE_CANTOPEN_CONVPATH = 1038,
    SQLITE_CONSTRAINT_CHECK = 275,
    SQLITE_CONSTRAINT_COMMITHOOK = 531,
    SQLITE_CONSTRAINT_FOREIGNKEY = 787,
    SQLITE_CONSTRAINT_FUNCTION = 1043,
    SQLITE_CONSTRAINT_NOTNULL = 1299,
    SQLITE_CONSTRAINT_PRIMARYKEY = 1555,
    SQLITE_CONSTRAINT_TRIGGER = 1811,
    SQLITE_CONSTRAINT_UNIQUE = 2067,
    SQLITE_CONSTRAINT_VTAB = 2323,
    SQLITE_CONSTRAINT_ROWID = 2579,
    SQLITE_NOTICE_RECOVER_WAL = 283,
    SQLITE_NOTICE_RECOVER_ROLLBACK = 539,
    SQLITE_WARNING_AUTOINDEX = 284,
    SQLITE_AUTH_USER = 279,
}

/// Column datatype codes reported by `sqlite3_column_type`.
#[repr(i32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
pub enum ColumnType {
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
}
