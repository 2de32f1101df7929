//! Batch admission check
//!
//! Pure predicate over a candidate batch: would the resulting flag file blow
//! the configured content-size or counter limits? Safe to call repeatedly
//! while the distributor shrinks a candidate until it fits.

use crate::config::{FlagDataTypeConfig, FlagMakerConfig, Layout};
use crate::content;
use crate::entry::TrackedEntry;

/// Counters the ingest platform tracks per flag: two per file plus two for
/// the job itself.
pub fn expected_counters(file_count: usize) -> u64 {
    2 * file_count as u64 + 2
}

#[derive(Debug, Clone)]
pub struct SizeValidator {
    config: FlagMakerConfig,
    layout: Layout,
}

impl SizeValidator {
    pub fn new(config: FlagMakerConfig) -> Self {
        let layout = config.layout();
        Self { config, layout }
    }

    /// True if the candidate batch fits both the content-size limit and the
    /// counter ceiling. Mirrors the real renderer, so the size check is
    /// exact rather than an estimate.
    pub fn is_valid(&self, dt: &FlagDataTypeConfig, candidate: &[TrackedEntry]) -> bool {
        if let Some(ceiling) = dt.max_counters {
            if expected_counters(candidate.len()) > ceiling {
                return false;
            }
        }
        let uris: Vec<String> = candidate
            .iter()
            .map(|entry| content::entry_uri(entry, &self.layout))
            .collect();
        content::rendered_len(&self.config, dt, &uris) <= dt.max_flag_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlagOrder;
    use std::path::PathBuf;

    fn config() -> FlagMakerConfig {
        FlagMakerConfig {
            data_dir: PathBuf::from("/d"),
            flag_dir: PathBuf::from("/d/flags"),
            pool: "alpha".into(),
            home: "/opt/ingest".into(),
            separator: "/".into(),
            poll_interval_secs: 30,
            worker_threads: 2,
            control_addr: "127.0.0.1:0".into(),
            dir_cache_capacity: 16,
            dir_cache_ttl_secs: 60,
            stamp_mtime: true,
            block_size: 5,
            data_types: vec![],
        }
    }

    fn data_type() -> FlagDataTypeConfig {
        FlagDataTypeConfig {
            name: "events".into(),
            folders: vec!["a".into()],
            script: "load.sh".into(),
            reducers: "-r 4".into(),
            input_format: "SequenceFile".into(),
            file_list_marker: None,
            extra_args: None,
            max_flag_size_bytes: 4096,
            max_counters: None,
            timeout_secs: 600,
            max_backlog: None,
            batch_max_files: 10,
            order: FlagOrder::Fifo,
        }
    }

    fn entries(count: usize) -> Vec<TrackedEntry> {
        (0..count)
            .map(|i| TrackedEntry::new("a", format!("f{i}"), 10, 5, i as i64))
            .collect()
    }

    #[test]
    fn test_counter_ceiling_boundary() {
        let validator = SizeValidator::new(config());
        let mut dt = data_type();
        dt.max_flag_size_bytes = u64::MAX;
        dt.max_counters = Some(10_000);
        // 4999 * 2 + 2 == 10000: boundary accepted
        assert!(validator.is_valid(&dt, &entries(4999)));
        // 5000 * 2 + 2 == 10002: rejected
        assert!(!validator.is_valid(&dt, &entries(5000)));
    }

    #[test]
    fn test_unset_ceiling_is_unbounded() {
        let validator = SizeValidator::new(config());
        let mut dt = data_type();
        dt.max_flag_size_bytes = u64::MAX;
        assert!(validator.is_valid(&dt, &entries(5000)));
    }

    #[test]
    fn test_size_check_agrees_with_renderer() {
        let cfg = config();
        let validator = SizeValidator::new(cfg.clone());
        let layout = cfg.layout();
        let batch = entries(3);
        let uris: Vec<String> = batch
            .iter()
            .map(|e| content::entry_uri(e, &layout))
            .collect();
        let exact = content::rendered_len(&cfg, &data_type(), &uris);

        let mut dt = data_type();
        dt.max_flag_size_bytes = exact;
        assert!(validator.is_valid(&dt, &batch), "exact length must pass");
        dt.max_flag_size_bytes = exact - 1;
        assert!(!validator.is_valid(&dt, &batch), "one byte over must fail");
    }

    #[test]
    fn test_empty_candidate_is_valid() {
        let validator = SizeValidator::new(config());
        assert!(validator.is_valid(&data_type(), &[]));
    }
}
