//! Property tests: random create/delete sequences must preserve the
//! trigger-maintained counters and lifetimes.

use proptest::prelude::*;

use crate::db::entity::DatabaseEntity;
use crate::model::album::Album;
use crate::model::album_track::AlbumTrack;
use crate::model::artist::Artist;
use crate::test_utils::TestLibrary;

#[derive(Debug, Clone)]
enum Op {
    AddTrack {
        album: u8,
        artist: u8,
        track_number: u8,
        disc_number: u8,
    },
    DeleteTrack {
        pick: u8,
    },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0u8..4, 1u8..20, 1u8..3).prop_map(|(album, artist, track_number, disc_number)| {
            Op::AddTrack {
                album,
                artist,
                track_number,
                disc_number,
            }
        }),
        (0u8..255).prop_map(|pick| Op::DeleteTrack { pick }),
    ]
}

fn album_title(index: u8) -> String {
    format!("prop album {}", index)
}

fn artist_name(index: u8) -> String {
    format!("prop artist {}", index)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_mutations_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let t = TestLibrary::new();
        let core = t.core();
        let mut live_tracks: Vec<i64> = Vec::new();
        let mut sequence = 0u32;

        for op in ops {
            match op {
                Op::AddTrack { album, artist, track_number, disc_number } => {
                    sequence += 1;
                    let title = album_title(album);
                    let album = match Album::from_title_and_artist(core, &title, None).unwrap() {
                        Some(existing) => existing,
                        None => Album::create(core, &title, None).unwrap(),
                    };
                    let name = artist_name(artist);
                    let artist = match Artist::by_name(core, &name).unwrap() {
                        Some(existing) => existing,
                        None => Artist::create(core, &name).unwrap(),
                    };
                    let media = t.add_audio_media(&format!("prop-{}.mp3", sequence));
                    let track = AlbumTrack::create(
                        core,
                        &media,
                        &album,
                        Some(&artist),
                        None,
                        i64::from(track_number),
                        i64::from(disc_number),
                    )
                    .unwrap();
                    live_tracks.push(track.read().id());
                }
                Op::DeleteTrack { pick } => {
                    if live_tracks.is_empty() {
                        continue;
                    }
                    let index = usize::from(pick) % live_tracks.len();
                    let track_id = live_tracks.swap_remove(index);
                    prop_assert!(AlbumTrack::destroy(core, track_id).unwrap());
                }
            }
        }

        let conn = core.db.reader().unwrap();

        // Counters match the actual rows.
        let mismatched_albums: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Album a WHERE a.nb_tracks !=
                (SELECT COUNT(*) FROM AlbumTrack t WHERE t.album_id = a.id_album)",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(mismatched_albums, 0);

        let mismatched_artists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Artist a WHERE a.nb_tracks !=
                (SELECT COUNT(*) FROM AlbumTrack t WHERE t.artist_id = a.id_artist)",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(mismatched_artists, 0);

        // Albums only exist while they have tracks.
        let empty_albums: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Album WHERE nb_tracks = 0",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(empty_albums, 0);

        // Artists with no content are reaped, reserved rows aside.
        let zombie_artists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Artist
             WHERE nb_albums = 0 AND nb_tracks = 0 AND id_artist > 2",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(zombie_artists, 0);

        // Presence: everything lives on a present device here.
        let absent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Album WHERE is_present = 0",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(absent, 0);

        // No track may outlive its media's main file.
        let orphans: i64 = conn.query_row(
            "SELECT COUNT(*) FROM AlbumTrack t
             WHERE NOT EXISTS (SELECT 1 FROM File f
                WHERE f.media_id = t.media_id AND f.type = 0)",
            [],
            |r| r.get(0),
        ).unwrap();
        prop_assert_eq!(orphans, 0);
    }
}
