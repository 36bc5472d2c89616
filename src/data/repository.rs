use rusqlite::{params, Connection, Row};

use crate::error::AppError;
use crate::models::image::{ImageRecord, TextRegion};

pub fn upsert_image(conn: &Connection, record: &ImageRecord) -> Result<(), AppError> {
    let items_json = serde_json::to_string(&record.items)?;
    conn.execute(
        "INSERT OR REPLACE INTO images (path, fingerprint, width, height, items, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.path,
            record.fingerprint,
            record.width,
            record.height,
            items_json,
            record.indexed_at,
        ],
    )?;
    Ok(())
}

fn image_from_row(row: &Row<'_>) -> Result<(ImageRecord, String), rusqlite::Error> {
    let items_json: String = row.get(4)?;
    Ok((
        ImageRecord {
            path: row.get(0)?,
            fingerprint: row.get(1)?,
            width: row.get(2)?,
            height: row.get(3)?,
            items: Vec::new(),
            indexed_at: row.get(5)?,
        },
        items_json,
    ))
}

fn decode_items(record: &mut ImageRecord, items_json: &str) -> Result<(), AppError> {
    record.items = serde_json::from_str::<Vec<TextRegion>>(items_json)?;
    Ok(())
}

/// Loads every record. Rows whose items column fails to decode are skipped so a
/// single damaged row does not hide the rest of the index; they get re-indexed
/// on the next scan because their path is missing.
pub fn load_all_images(conn: &Connection) -> Result<Vec<ImageRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT path, fingerprint, width, height, items, indexed_at
         FROM images ORDER BY path ASC",
    )?;

    let rows = stmt
        .query_map([], image_from_row)?
        .filter_map(|r| r.ok())
        .filter_map(|(mut record, items_json)| {
            match decode_items(&mut record, &items_json) {
                Ok(()) => Some(record),
                Err(err) => {
                    tracing::warn!(path = %record.path, error = %err, "skipping undecodable index row");
                    None
                }
            }
        })
        .collect();

    Ok(rows)
}

pub fn delete_image(conn: &Connection, path: &str) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM images WHERE path = ?1", params![path])?;
    Ok(count)
}

pub fn clear_images(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM images", [])?;
    Ok(count)
}
