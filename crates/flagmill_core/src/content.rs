//! Flag file content and naming
//!
//! The single source of truth for how a batch is rendered into flag-file
//! text. [`SizeValidator`](crate::validator::SizeValidator) calls the same
//! renderer, so admission estimates are exact by construction.
//!
//! Rendered format:
//!
//! ```text
//! <home><sep><script> <uri>[, <uri>]... <reducers> -inputFormat <fmt> [...]\n
//! [<marker>\n<uri>\n...]
//! ```
//!
//! With a file-list marker configured the inline list is replaced by
//! [`FLAG_PATH_PLACEHOLDER`], which the consumer resolves to the flag file's
//! own final path, and the list follows the command line one URI per line.

use crate::config::{FlagDataTypeConfig, FlagMakerConfig, Layout};
use crate::entry::{TrackedDir, TrackedEntry};

/// Suffix of a finalized flag file.
pub const FLAG_SUFFIX: &str = ".flag";

/// Transient suffix while content is being written.
pub const GENERATING_SUFFIX: &str = ".generating";

/// Token substituted for the input list when a file-list marker is
/// configured; resolved by the consumer to the flag file's final path.
pub const FLAG_PATH_PLACEHOLDER: &str = "{flagPath}";

/// URI of an entry as the consumer will see it: its completed location.
pub fn entry_uri(entry: &TrackedEntry, layout: &Layout) -> String {
    entry
        .path_in(layout, TrackedDir::Completed)
        .display()
        .to_string()
}

/// Render flag content for an already-ordered batch.
pub fn render(config: &FlagMakerConfig, dt: &FlagDataTypeConfig, uris: &[String]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(&config.home);
    out.push_str(&config.separator);
    out.push_str(&dt.script);
    out.push(' ');
    match &dt.file_list_marker {
        Some(_) => out.push_str(FLAG_PATH_PLACEHOLDER),
        None => out.push_str(&uris.join(", ")),
    }
    out.push(' ');
    out.push_str(&dt.reducers);
    out.push_str(" -inputFormat ");
    out.push_str(&dt.input_format);
    if let Some(marker) = &dt.file_list_marker {
        out.push_str(" -inputFileLists -inputFileListMarker ");
        out.push_str(marker);
    }
    if let Some(extra) = &dt.extra_args {
        out.push(' ');
        out.push_str(extra);
    }
    out.push('\n');
    if let Some(marker) = &dt.file_list_marker {
        out.push_str(marker);
        out.push('\n');
        for uri in uris {
            out.push_str(uri);
            out.push('\n');
        }
    }
    out
}

/// Exact byte length of the content [`render`] would produce.
pub fn rendered_len(config: &FlagMakerConfig, dt: &FlagDataTypeConfig, uris: &[String]) -> u64 {
    render(config, dt, uris).len() as u64
}

/// Finalized flag file name:
/// `<epoch-seconds-2dp>_<pool>_<dataType>_<firstFolder>+<count>.flag`.
pub fn flag_name(
    epoch_secs: f64,
    pool: &str,
    data_type: &str,
    first_folder: &str,
    file_count: usize,
) -> String {
    format!("{epoch_secs:.2}_{pool}_{data_type}_{first_folder}+{file_count}{FLAG_SUFFIX}")
}

/// True if `name` is a finalized flag file emitted for this pool and type.
///
/// Parses the name back into its fields. The folder segment is taken as
/// everything after the last underscore, so a data type whose name extends
/// another's never matches the shorter one.
pub fn is_flag_for(name: &str, pool: &str, data_type: &str) -> bool {
    let Some(stem) = name.strip_suffix(FLAG_SUFFIX) else {
        return false;
    };
    let Some((rest, count)) = stem.rsplit_once('+') else {
        return false;
    };
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Some((head, _folder)) = rest.rsplit_once('_') else {
        return false;
    };
    let Some((epoch, ident)) = head.split_once('_') else {
        return false;
    };
    if epoch.parse::<f64>().is_err() {
        return false;
    }
    ident.strip_prefix(pool).and_then(|s| s.strip_prefix('_')) == Some(data_type)
}
