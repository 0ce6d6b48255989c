//! Small helpers shared across the crate: MRL string handling and clock
//! access.

pub mod mrl {
    //! Media resource locators are kept as strings; only `file://` MRLs are
    //! ever turned back into filesystem paths. Percent-encoding follows the
    //! URL path rules so that MRLs survive round-trips through the catalog.

    use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
    use std::path::{Path, PathBuf};

    /// Characters escaped inside a path segment. '/' is kept verbatim as the
    /// segment separator.
    const PATH_SET: &AsciiSet = &CONTROLS
        .add(b' ')
        .add(b'"')
        .add(b'#')
        .add(b'%')
        .add(b'<')
        .add(b'>')
        .add(b'?')
        .add(b'[')
        .add(b']')
        .add(b'^')
        .add(b'`')
        .add(b'{')
        .add(b'}');

    /// Percent-encode a decoded path, leaving the scheme untouched.
    pub fn encode(input: &str) -> String {
        match input.split_once("://") {
            Some((scheme, rest)) => {
                format!("{}://{}", scheme, utf8_percent_encode(rest, PATH_SET))
            }
            None => utf8_percent_encode(input, PATH_SET).to_string(),
        }
    }

    /// Decode every percent escape in an MRL.
    pub fn decode(input: &str) -> String {
        percent_decode_str(input).decode_utf8_lossy().into_owned()
    }

    /// Build a `file://` MRL from a local path.
    pub fn from_path(path: &Path) -> String {
        let raw = path.to_string_lossy();
        format!("file://{}", utf8_percent_encode(&raw, PATH_SET))
    }

    /// Resolve a `file://` MRL back to a local path. Returns `None` for any
    /// other scheme.
    pub fn to_path(mrl: &str) -> Option<PathBuf> {
        let rest = mrl.strip_prefix("file://")?;
        Some(PathBuf::from(decode(rest)))
    }

    /// Scheme of an MRL ("file", "smb", "magnet", ...), if any.
    pub fn scheme(mrl: &str) -> Option<&str> {
        mrl.split_once("://").map(|(s, _)| s)
    }

    /// Everything up to and including the last '/' separator.
    pub fn directory(mrl: &str) -> String {
        match mrl.rfind('/') {
            Some(idx) => mrl[..=idx].to_string(),
            None => String::new(),
        }
    }

    /// The component after the last '/' separator.
    pub fn file_name(mrl: &str) -> &str {
        match mrl.rfind('/') {
            Some(idx) => &mrl[idx + 1..],
            None => mrl,
        }
    }

    /// File extension of the last path component, without the dot.
    pub fn extension(mrl: &str) -> Option<&str> {
        let name = file_name(mrl);
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

}

pub mod clock {
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Seconds since the Unix epoch.
    pub fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
