//! Versioned upgrade of the on-disk schema.
//!
//! Migrations run in order, each inside a transaction with foreign keys and
//! recursive triggers disabled (except where a step needs the presence
//! propagation chain, noted inline). Databases older than model 3, at the
//! broken model 4, or newer than the current model are dropped and
//! recreated by the caller.

use tracing::info;

use crate::core::Core;
use crate::error::Result;
use crate::model::album::Album;
use crate::model::album_track::AlbumTrack;
use crate::model::artist::Artist;
use crate::model::file::File;
use crate::model::media::Media;
use crate::model::playlist::Playlist;
use crate::model::settings::{Settings, DB_MODEL_VERSION};
use crate::model::MediaType;
use crate::parser::task::ParseTask;
use crate::utils::mrl;

/// Outcome of a model check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    UpToDate,
    /// Upgrades ran; `rescan` asks the caller to force a full rescan.
    Upgraded { rescan: bool },
    /// The database cannot be upgraded and must be recreated.
    NeedsReset,
}

/// Bring the schema from `settings`' stored version up to
/// [`DB_MODEL_VERSION`].
pub fn upgrade_model(core: &Core, settings: &mut Settings) -> Result<MigrationOutcome> {
    let stored = settings.db_model_version();
    if stored == DB_MODEL_VERSION {
        return Ok(MigrationOutcome::UpToDate);
    }
    info!(from = stored, to = DB_MODEL_VERSION, "updating database model");
    if stored > DB_MODEL_VERSION || stored < 3 || stored == 4 {
        return Ok(MigrationOutcome::NeedsReset);
    }

    let mut version = stored;
    let mut rescan = false;
    if version == 3 {
        migrate_model_3_to_5(core)?;
        version = 5;
    }
    if version == 5 {
        migrate_model_5_to_6(core)?;
        version = 6;
    }
    if version == 6 {
        // Early metadata analysis wrote broken rows; only a rescan fixes
        // the already-inserted data.
        rescan = true;
        version = 7;
    }
    if version == 7 {
        migrate_model_7_to_8(core)?;
        version = 8;
    }
    if version == 8 {
        // MRL encoding changed, invalidating potentially every stored MRL.
        rescan = true;
        migrate_model_8_to_9(core)?;
        version = 9;
    }
    if version == 9 {
        rescan = true;
        migrate_model_9_to_10(core)?;
        version = 10;
    }
    if version == 10 {
        rescan = true;
        migrate_model_10_to_11(core)?;
        version = 11;
    }
    if version == 11 {
        ParseTask::recover_unscanned_files(core)?;
        version = 12;
    }
    if version == 12 {
        migrate_model_12_to_13(core)?;
        version = 13;
    }
    debug_assert_eq!(version, DB_MODEL_VERSION);
    settings.set_db_model_version(&core.db, DB_MODEL_VERSION)?;
    Ok(MigrationOutcome::Upgraded { rescan })
}

fn table_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(columns)
}

/// Model 4 never shipped cleanly; model 3 databases jump straight to 5.
/// The media subtype column and file-backed playlists arrived here.
fn migrate_model_3_to_5(core: &Core) -> Result<()> {
    core.db.weak_context(|_| {
        core.db.transaction(|conn| {
            let media_columns = table_columns(conn, "Media")?;
            if !media_columns.iter().any(|c| c == "subtype") {
                conn.execute(
                    "ALTER TABLE Media ADD COLUMN subtype INTEGER NOT NULL DEFAULT 0",
                    [],
                )?;
            }
            let playlist_columns = table_columns(conn, "Playlist")?;
            if !playlist_columns.iter().any(|c| c == "file_id") {
                conn.execute(
                    "ALTER TABLE Playlist ADD COLUMN file_id UNSIGNED INT DEFAULT NULL",
                    [],
                )?;
            }
            // The rebuild dropped triggers on both tables.
            Media::create_triggers(conn)?;
            Playlist::create_triggers(conn)?;
            Ok(())
        })
    })
}

/// Unknown-typed media were never usable; presence flags were left at
/// arbitrary non-zero values by early trigger versions.
fn migrate_model_5_to_6(core: &Core) -> Result<()> {
    core.db.transaction(|conn| {
        conn.execute(
            "DELETE FROM Media WHERE type = ?",
            [MediaType::Unknown.to_i64()],
        )?;
        Ok(())
    })?;
    core.db.weak_context(|conn| {
        conn.execute("UPDATE Media SET is_present = 1 WHERE is_present != 0", [])?;
        Ok(())
    })
}

/// Artist track counting and the artist auto-delete trigger arrived with
/// model 8.
fn migrate_model_7_to_8(core: &Core) -> Result<()> {
    core.db.weak_context(|_| {
        core.db.transaction(|conn| {
            let artist_columns = table_columns(conn, "Artist")?;
            if !artist_columns.iter().any(|c| c == "nb_tracks") {
                conn.execute(
                    "ALTER TABLE Artist ADD COLUMN nb_tracks UNSIGNED INT NOT NULL DEFAULT 0",
                    [],
                )?;
                conn.execute(
                    "UPDATE Artist SET nb_tracks =
                        (SELECT COUNT(id_track) FROM AlbumTrack
                            WHERE artist_id = Artist.id_artist)",
                    [],
                )?;
            }
            Artist::create_triggers(conn, 8)?;
            Media::create_triggers(conn)?;
            File::create_triggers(conn)?;
            Ok(())
        })
    })
}

/// A missing trigger could leave media without any file behind; purge them.
fn migrate_model_8_to_9(core: &Core) -> Result<()> {
    core.db.transaction(|conn| {
        conn.execute(
            "DELETE FROM Media WHERE id_media IN
                (SELECT m.id_media FROM Media m
                    LEFT JOIN File f ON f.media_id = m.id_media
                    WHERE f.media_id IS NULL)",
            [],
        )?;
        Ok(())
    })
}

/// Matches values containing a literal '%' or '#', both of which mean the
/// stored MRL predates the normalized encoding.
fn needs_reencoding(column: &str) -> String {
    format!(
        "{col} LIKE '%#%%' ESCAPE '#' OR {col} LIKE '%##%' ESCAPE '#'",
        col = column
    )
}

/// Re-encode file MRLs left in a mixed encoding by older versions.
fn migrate_model_9_to_10(core: &Core) -> Result<()> {
    let files: Vec<(i64, String)> = core.db.read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT id_file, mrl FROM File WHERE {}",
            needs_reencoding("mrl")
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })?;
    core.db.transaction(|conn| {
        for (id, stored) in files {
            let encoded = mrl::encode(&mrl::decode(&stored));
            info!(from = %stored, to = %encoded, "re-encoding file mrl");
            conn.execute(
                "UPDATE File SET mrl = ? WHERE id_file = ?",
                rusqlite::params![encoded, id],
            )?;
        }
        Ok(())
    })
}

/// Same as 9 to 10, for task MRLs and folder paths.
fn migrate_model_10_to_11(core: &Core) -> Result<()> {
    let tasks: Vec<(i64, String)> = core.db.read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT id_task, mrl FROM ParseTask WHERE {}",
            needs_reencoding("mrl")
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })?;
    let folders: Vec<(i64, String)> = core.db.read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT id_folder, path FROM Folder WHERE {}",
            needs_reencoding("path")
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })?;
    core.db.transaction(|conn| {
        for (id, stored) in tasks {
            let encoded = mrl::encode(&mrl::decode(&stored));
            conn.execute(
                "UPDATE ParseTask SET mrl = ? WHERE id_task = ?",
                rusqlite::params![encoded, id],
            )?;
        }
        for (id, stored) in folders {
            let encoded = mrl::encode(&mrl::decode(&stored));
            conn.execute(
                "UPDATE Folder SET path = ? WHERE id_folder = ?",
                rusqlite::params![encoded, id],
            )?;
        }
        Ok(())
    })
}

/// Recreate the presence propagation triggers (one carried a typo that
/// made it fire before the update), then rewrite `AlbumTrack.is_present`
/// so the whole album/artist presence chain settles on correct values.
fn migrate_model_12_to_13(core: &Core) -> Result<()> {
    core.db.transaction(|conn| {
        for trigger in [
            "is_track_presentAFTER",
            "is_track_present",
            "has_album_present",
            "is_album_present",
        ] {
            conn.execute(&format!("DROP TRIGGER IF EXISTS {}", trigger), [])?;
        }
        AlbumTrack::create_triggers(conn)?;
        Album::create_triggers(conn)?;
        Artist::create_triggers(conn, 13)?;
        // Keep foreign keys and recursive triggers on: this update must
        // cascade through the recreated chain.
        conn.execute(
            "UPDATE AlbumTrack SET is_present =
                (SELECT is_present FROM Media WHERE id_media = media_id)",
            [],
        )?;
        Ok(())
    })
}

/// Wipe all derived metadata and reset every task, keeping devices,
/// folders and files. Run after migrations that invalidate parsing
/// output, and by the public force-rescan entry point.
pub fn wipe_derived_metadata(core: &Core) -> Result<()> {
    core.db.transaction(|conn| {
        AlbumTrack::delete_all(core)?;
        crate::model::genre::Genre::delete_all(core)?;
        Album::delete_all(core)?;
        Artist::delete_all(core)?;
        crate::model::movie::Movie::delete_all(core)?;
        crate::model::show::ShowEpisode::delete_all(core)?;
        crate::model::show::Show::delete_all(core)?;
        crate::model::audio_track::AudioTrack::delete_all(core)?;
        Playlist::delete_file_backed(core)?;
        ParseTask::reset_parsing(core)?;
        core.cache.clear();
        Artist::create_default_artists(conn)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::db::SqlStore;
    use crate::model::settings;

    fn core_with_schema() -> Core {
        let store = SqlStore::open_in_memory().unwrap();
        {
            let conn = store.writer();
            schema::create_all_tables(&conn).unwrap();
            schema::create_all_triggers(&conn, DB_MODEL_VERSION).unwrap();
        }
        Core::new(store)
    }

    #[test]
    fn fresh_database_is_up_to_date() {
        let core = core_with_schema();
        let mut loaded = Settings::load(&core.db).unwrap();
        assert_eq!(loaded.db_model_version(), DB_MODEL_VERSION);
        let outcome = upgrade_model(&core, &mut loaded).unwrap();
        assert_eq!(outcome, MigrationOutcome::UpToDate);
    }

    #[test]
    fn downgrade_requests_reset() {
        let core = core_with_schema();
        let mut loaded = Settings::load(&core.db).unwrap();
        loaded
            .set_db_model_version(&core.db, DB_MODEL_VERSION + 1)
            .unwrap();
        let outcome = upgrade_model(&core, &mut loaded).unwrap();
        assert_eq!(outcome, MigrationOutcome::NeedsReset);
    }

    #[test]
    fn ancient_models_request_reset() {
        let core = core_with_schema();
        let mut loaded = Settings::load(&core.db).unwrap();
        for broken in [1, 2, 4] {
            loaded.set_db_model_version(&core.db, broken).unwrap();
            let outcome = upgrade_model(&core, &mut loaded).unwrap();
            assert_eq!(outcome, MigrationOutcome::NeedsReset, "model {}", broken);
        }
    }

    #[test]
    fn upgrade_from_12_is_idempotent() {
        let core = core_with_schema();
        let mut loaded = Settings::load(&core.db).unwrap();
        for _ in 0..2 {
            loaded.set_db_model_version(&core.db, 12).unwrap();
            let outcome = upgrade_model(&core, &mut loaded).unwrap();
            assert_eq!(outcome, MigrationOutcome::Upgraded { rescan: false });
            assert_eq!(loaded.db_model_version(), DB_MODEL_VERSION);
        }
    }

    #[test]
    fn upgrade_from_9_requests_rescan_and_reencodes_mrls() {
        let core = core_with_schema();
        {
            let conn = core.db.writer();
            conn.execute(
                "INSERT INTO Device(uuid, is_removable) VALUES('d', 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO Folder(path, device_id, is_removable)
                 VALUES('file:///music/', 1, 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO Media(type, insertion_date, title, filename)
                 VALUES(2, 0, 't', 't')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO File(media_id, mrl, type, folder_id, is_removable, is_external)
                 VALUES(1, 'file:///music/a#b.mp3', 0, 1, 0, 0)",
                [],
            )
            .unwrap();
        }
        let mut loaded = Settings::load(&core.db).unwrap();
        loaded.set_db_model_version(&core.db, 9).unwrap();
        let outcome = upgrade_model(&core, &mut loaded).unwrap();
        assert_eq!(outcome, MigrationOutcome::Upgraded { rescan: true });

        let stored: String = core
            .db
            .writer()
            .query_row("SELECT mrl FROM File WHERE id_file = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "file:///music/a%23b.mp3");
    }

    #[test]
    fn settings_survive_reload() {
        let core = core_with_schema();
        let mut loaded = Settings::load(&core.db).unwrap();
        loaded.set_db_model_version(&core.db, 12).unwrap();
        let reloaded = settings::Settings::load(&core.db).unwrap();
        assert_eq!(reloaded.db_model_version(), 12);
    }
}
