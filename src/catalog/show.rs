// Show and ShowEpisode rows, one of the alternate media sub-types.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::media::{self, MediaSubType};
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub id: i64,
    pub title: Option<String>,
    pub release_date: Option<i64>,
    pub short_summary: Option<String>,
    pub artwork_mrl: Option<String>,
    pub tvdb_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowEpisode {
    pub id: i64,
    pub media_id: i64,
    pub episode_number: Option<i64>,
    pub season_number: Option<i64>,
    pub episode_summary: Option<String>,
    pub tvdb_id: Option<String>,
    pub show_id: i64,
}

const SELECT_SHOW: &str =
    "SELECT id, title, release_date, short_summary, artwork_mrl, tvdb_id FROM shows";
const SELECT_EPISODE: &str = "SELECT id, media_id, episode_number, season_number, \
                              episode_summary, tvdb_id, show_id FROM show_episodes";

fn map_show(row: &Row) -> rusqlite::Result<Show> {
    Ok(Show {
        id: row.get(0)?,
        title: row.get(1)?,
        release_date: row.get(2)?,
        short_summary: row.get(3)?,
        artwork_mrl: row.get(4)?,
        tvdb_id: row.get(5)?,
    })
}

fn map_episode(row: &Row) -> rusqlite::Result<ShowEpisode> {
    Ok(ShowEpisode {
        id: row.get(0)?,
        media_id: row.get(1)?,
        episode_number: row.get(2)?,
        season_number: row.get(3)?,
        episode_summary: row.get(4)?,
        tvdb_id: row.get(5)?,
        show_id: row.get(6)?,
    })
}

pub(crate) fn create(conn: &Connection, title: &str) -> Result<i64> {
    conn.execute("INSERT INTO shows (title) VALUES (?1)", params![title])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Show>> {
    let result = conn
        .query_row(&format!("{SELECT_SHOW} WHERE id = ?1"), params![id], map_show)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Show>>> {
    core.caches
        .show
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn by_title(conn: &Connection, title: &str) -> Result<Option<Show>> {
    let result = conn
        .query_row(
            &format!("{SELECT_SHOW} WHERE title = ?1"),
            params![title],
            map_show,
        )
        .optional()?;
    Ok(result)
}

/// Attach an episode to a show; the media's sub-type follows.
pub(crate) fn add_episode(
    conn: &Connection,
    show_id: i64,
    media_id: i64,
    season_number: Option<i64>,
    episode_number: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO show_episodes (media_id, show_id, season_number, episode_number)
         VALUES (?1, ?2, ?3, ?4)",
        params![media_id, show_id, season_number, episode_number],
    )?;
    let id = conn.last_insert_rowid();
    media::set_sub_type(conn, media_id, MediaSubType::ShowEpisode)?;
    Ok(id)
}

pub(crate) fn fetch_episode(core: &Core, id: i64) -> Result<Option<Arc<ShowEpisode>>> {
    core.caches
        .show_episode
        .fetch(id, || core.db.with_conn(|conn| episode_get(conn, id)))
}

pub(crate) fn episode_get(conn: &Connection, id: i64) -> Result<Option<ShowEpisode>> {
    let result = conn
        .query_row(
            &format!("{SELECT_EPISODE} WHERE id = ?1"),
            params![id],
            map_episode,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn episode_from_media(conn: &Connection, media_id: i64) -> Result<Option<ShowEpisode>> {
    let result = conn
        .query_row(
            &format!("{SELECT_EPISODE} WHERE media_id = ?1"),
            params![media_id],
            map_episode,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn episodes(conn: &Connection, show_id: i64) -> Result<Vec<ShowEpisode>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_EPISODE} WHERE show_id = ?1 ORDER BY season_number, episode_number"
    ))?;
    let episodes = stmt
        .query_map(params![show_id], map_episode)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(episodes)
}
