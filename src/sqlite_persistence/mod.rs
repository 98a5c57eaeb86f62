mod versioned_schema;

pub use versioned_schema::{
    open_versioned, read_db_version, Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
    BUSY_TIMEOUT,
};
