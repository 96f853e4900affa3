// Task rows: the persistent scan units driven through the parser chain.
// step is a bitmask of completed stages, saved after each service so a crash
// resumes where parsing stopped.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::constants::TASK_MAX_RETRIES;
use crate::error::Result;
use crate::probe::MediaProbe;

pub(crate) const STEP_NONE: u8 = 0;
pub(crate) const STEP_METADATA_EXTRACTION: u8 = 1;
pub(crate) const STEP_METADATA_ANALYSIS: u8 = 2;
pub(crate) const STEP_THUMBNAILER: u8 = 4;
pub(crate) const STEP_COMPLETED: u8 =
    STEP_METADATA_EXTRACTION | STEP_METADATA_ANALYSIS | STEP_THUMBNAILER;

#[derive(Debug)]
pub(crate) struct Task {
    pub id: i64,
    pub step: u8,
    pub retry_count: i64,
    pub mrl: String,
    pub file_id: Option<i64>,
    pub parent_folder_id: Option<i64>,
    pub parent_playlist_id: Option<i64>,
    pub parent_playlist_index: i64,

    // Transient state, rebuilt on crash recovery
    pub current_service: usize,
    pub media_id: Option<i64>,
    pub probe: Option<MediaProbe>,
    /// Tasks spawned by this one (playlist entries), scheduled on completion.
    pub children: Vec<Task>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.step == STEP_COMPLETED
    }

    pub fn is_step_completed(&self, step: u8) -> bool {
        self.step & step != 0
    }

    pub fn mark_step_completed(&mut self, step: u8) {
        self.step |= step;
    }

    pub fn mark_step_uncompleted(&mut self, step: u8) {
        self.step &= !step;
    }
}

fn map_task(row: &Row) -> rusqlite::Result<Task> {
    let parent_playlist_id: i64 = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        step: row.get::<_, i64>(1)? as u8,
        retry_count: row.get(2)?,
        mrl: row.get(3)?,
        file_id: row.get(4)?,
        parent_folder_id: row.get(5)?,
        parent_playlist_id: (parent_playlist_id != 0).then_some(parent_playlist_id),
        parent_playlist_index: row.get(7)?,
        current_service: 0,
        media_id: None,
        probe: None,
        children: Vec::new(),
    })
}

const SELECT: &str = "SELECT id, step, retry_count, mrl, file_id, parent_folder_id, \
                      parent_playlist_id, parent_playlist_index FROM tasks";

/// Insert a scan unit. A DbConstraint error means the file is already
/// scheduled; discovery downgrades that to a warning.
pub(crate) fn create(
    conn: &Connection,
    mrl: &str,
    parent_folder_id: i64,
    parent_playlist: Option<(i64, i64)>,
) -> Result<Task> {
    let (playlist_id, playlist_index) = parent_playlist.unwrap_or((0, 0));
    conn.execute(
        "INSERT INTO tasks (mrl, parent_folder_id, parent_playlist_id, parent_playlist_index)
         VALUES (?1, ?2, ?3, ?4)",
        params![mrl, parent_folder_id, playlist_id, playlist_index],
    )?;
    Ok(Task {
        id: conn.last_insert_rowid(),
        step: STEP_NONE,
        retry_count: 0,
        mrl: mrl.to_string(),
        file_id: None,
        parent_folder_id: Some(parent_folder_id),
        parent_playlist_id: (playlist_id != 0).then_some(playlist_id),
        parent_playlist_index: playlist_index,
        current_service: 0,
        media_id: None,
        probe: None,
        children: Vec::new(),
    })
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_task)
        .optional()?;
    Ok(result)
}

/// Tasks to restore at startup: incomplete, within the retry budget, and not
/// pointing at a file that is currently unreachable.
pub(crate) fn fetch_unparsed(conn: &Connection) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.step, t.retry_count, t.mrl, t.file_id, t.parent_folder_id,
                t.parent_playlist_id, t.parent_playlist_index
         FROM tasks t
         LEFT JOIN files f ON f.id = t.file_id
         WHERE t.step != ?1 AND t.retry_count < ?2
           AND (f.is_present != 0 OR t.file_id IS NULL)",
    )?;
    let tasks = stmt
        .query_map(params![STEP_COMPLETED as i64, TASK_MAX_RETRIES], map_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Persist step completion; a successful step clears the retry counter.
pub(crate) fn save_step(conn: &Connection, id: i64, step: u8) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET step = ?1, retry_count = 0 WHERE id = ?2",
        params![step as i64, id],
    )?;
    Ok(())
}

/// Bumped when a service picks the task up, so a crash mid-run still
/// consumes one attempt.
pub(crate) fn start_step(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET retry_count = retry_count + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub(crate) fn set_file_id(conn: &Connection, id: i64, file_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET file_id = ?1 WHERE id = ?2",
        params![file_id, id],
    )?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    Ok(())
}

/// Give failed-but-present tasks another retry budget.
pub(crate) fn reset_retry_count(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET retry_count = 0 WHERE step != ?1",
        params![STEP_COMPLETED as i64],
    )?;
    Ok(())
}

/// Restart every task from scratch (rescan).
pub(crate) fn reset_parsing(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE tasks SET retry_count = 0, step = 0", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_bitmask() {
        let mut task = Task {
            id: 1,
            step: STEP_NONE,
            retry_count: 0,
            mrl: "file:///x.mp3".into(),
            file_id: None,
            parent_folder_id: None,
            parent_playlist_id: None,
            parent_playlist_index: 0,
            current_service: 0,
            media_id: None,
            probe: None,
            children: Vec::new(),
        };
        assert!(!task.is_completed());
        task.mark_step_completed(STEP_METADATA_EXTRACTION);
        assert!(task.is_step_completed(STEP_METADATA_EXTRACTION));
        assert!(!task.is_step_completed(STEP_METADATA_ANALYSIS));
        task.mark_step_completed(STEP_METADATA_ANALYSIS);
        task.mark_step_completed(STEP_THUMBNAILER);
        assert!(task.is_completed());
        task.mark_step_uncompleted(STEP_THUMBNAILER);
        assert!(!task.is_completed());
    }
}
