use std::path::Path;

use rusqlite::{Connection, OpenFlags, Result};

/// Opens (creating if needed) the snapshot database in WAL mode.
pub fn init_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_row| Ok(()))?;
    Ok(conn)
}
