use rusqlite::Connection;

const SCHEMA: &str = include_str!("schema.sql");

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;

    // Migration: databases created before push notifications lack fcm_token
    let has_fcm_token: bool = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info('users') WHERE name='fcm_token'")?
        .query_row([], |row| row.get::<_, i32>(0))
        .map(|c| c > 0)
        .unwrap_or(false);

    if !has_fcm_token {
        conn.execute_batch("ALTER TABLE users ADD COLUMN fcm_token TEXT;")?;
    }

    Ok(())
}
