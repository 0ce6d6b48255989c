//! The supported-extensions whitelist and the coarse media classification
//! derived from it.

use crate::model::MediaType;

/// Every extension the discoverer will pick up. MUST stay alphabetically
/// sorted: lookups are binary searches.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "3gp", "a52", "aac", "ac3", "acelive", "aif", "aifc", "aiff", "alac", "amr",
    "amv", "aob", "ape", "asf", "asx", "avi", "b4s", "conf",
    "divx", "dts", "dv", "flac", "flv", "gxf", "ifo", "iso",
    "it", "itml", "m1v", "m2t", "m2ts", "m2v", "m3u", "m3u8",
    "m4a", "m4b", "m4p", "m4v", "mid", "mka", "mkv", "mlp",
    "mod", "mov", "mp1", "mp2", "mp3", "mp4", "mpc", "mpeg",
    "mpeg1", "mpeg2", "mpeg4", "mpg", "mts", "mxf", "nsv",
    "nuv", "oga", "ogg", "ogm", "ogv", "ogx", "oma", "opus",
    "pls", "ps", "qtl", "ram", "rec", "rm", "rmi", "rmvb",
    "s3m", "sdp", "spx", "tod", "torrent", "trp", "ts", "tta", "vlc",
    "vob", "voc", "vqf", "vro", "w64", "wav", "wax", "webm",
    "wma", "wmv", "wmx", "wpl", "wv", "wvx", "xa", "xm", "xspf",
];

/// Extensions of files the probe treats as audio.
const AUDIO_EXTENSIONS: &[&str] = &[
    "a52", "aac", "ac3", "aif", "aifc", "aiff", "alac", "amr", "aob", "ape",
    "dts", "flac", "it", "m4a", "m4b", "m4p", "mid", "mka", "mlp", "mod",
    "mp1", "mp2", "mp3", "mpc", "oga", "ogg", "oma", "opus", "rmi", "s3m",
    "spx", "tta", "voc", "vqf", "w64", "wav", "wma", "wv", "xa", "xm",
];

/// Extensions of files the probe treats as video.
const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "amv", "asf", "avi", "divx", "dv", "flv", "gxf", "m1v", "m2t",
    "m2ts", "m2v", "m4v", "mkv", "mov", "mp4", "mpeg", "mpeg1", "mpeg2",
    "mpeg4", "mpg", "mts", "mxf", "nsv", "nuv", "ogm", "ogv", "ogx", "ps",
    "rec", "rm", "rmvb", "tod", "trp", "ts", "vob", "vro", "webm", "wmv",
];

/// Playlist container formats.
const PLAYLIST_EXTENSIONS: &[&str] = &[
    "asx", "b4s", "itml", "m3u", "m3u8", "pls", "qtl", "ram", "vlc", "wax",
    "wpl", "wvx", "xspf",
];

/// Case-insensitive whitelist check.
pub fn is_supported(extension: &str) -> bool {
    let needle = extension.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.binary_search(&needle.as_str()).is_ok()
}

pub fn is_playlist(extension: &str) -> bool {
    let needle = extension.to_ascii_lowercase();
    PLAYLIST_EXTENSIONS.contains(&needle.as_str())
}

/// Coarse classification used by the probe stage before any codec
/// information is available.
pub fn media_type_for(extension: &str) -> MediaType {
    let needle = extension.to_ascii_lowercase();
    if AUDIO_EXTENSIONS.contains(&needle.as_str()) {
        MediaType::Audio
    } else if VIDEO_EXTENSIONS.contains(&needle.as_str()) {
        MediaType::Video
    } else {
        MediaType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_is_sorted() {
        let mut sorted = SUPPORTED_EXTENSIONS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, SUPPORTED_EXTENSIONS);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(is_supported("mp3"));
        assert!(is_supported("MP3"));
        assert!(is_supported("Mkv"));
        assert!(!is_supported("txt"));
        assert!(!is_supported(""));
    }

    #[test]
    fn classification_covers_whitelisted_formats() {
        assert_eq!(media_type_for("flac"), MediaType::Audio);
        assert_eq!(media_type_for("MKV"), MediaType::Video);
        assert_eq!(media_type_for("iso"), MediaType::Unknown);
        assert!(is_playlist("m3u"));
        assert!(is_playlist("M3U8"));
        assert!(!is_playlist("mp3"));
    }

    #[test]
    fn classified_extensions_are_whitelisted() {
        for ext in AUDIO_EXTENSIONS.iter().chain(VIDEO_EXTENSIONS) {
            assert!(is_supported(ext), "{} missing from whitelist", ext);
        }
    }
}
