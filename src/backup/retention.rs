//! Which archives to delete.

use super::ARCHIVE_SUFFIX;

pub fn archive_prefix(host: &str) -> String {
    format!("homelab-backup-{}-", host)
}

/// Names of `host`'s archives beyond the newest `keep`.
///
/// Timestamps in the names sort lexically, so name order is age order.
/// Archives of other hosts and unrelated files are never selected.
pub fn select_expired(names: &[String], host: &str, keep: usize) -> Vec<String> {
    let prefix = archive_prefix(host);
    let mut ours: Vec<&String> = names
        .iter()
        .filter(|n| n.starts_with(&prefix) && n.ends_with(ARCHIVE_SUFFIX))
        .filter(|n| {
            let stamp = &n[prefix.len()..n.len() - ARCHIVE_SUFFIX.len()];
            is_stamp(stamp)
        })
        .collect();
    ours.sort();
    ours.reverse();
    ours.into_iter().skip(keep).cloned().collect()
}

/// `YYYYmmdd-HHMMSS`
fn is_stamp(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keeps_newest() {
        let all = names(&[
            "homelab-backup-nas-20240103-000000.tar.gz.enc",
            "homelab-backup-nas-20240101-000000.tar.gz.enc",
            "homelab-backup-nas-20240102-000000.tar.gz.enc",
            "homelab-backup-nas-20240101-000000.tar.gz.enc.sha256",
        ]);
        assert_eq!(
            select_expired(&all, "nas", 2),
            vec!["homelab-backup-nas-20240101-000000.tar.gz.enc".to_string()]
        );
    }

    #[test]
    fn test_other_hosts_untouched() {
        let all = names(&[
            "homelab-backup-nas-20240101-000000.tar.gz.enc",
            "homelab-backup-nas-box-20240101-000000.tar.gz.enc",
            "homelab-backup-media-20240101-000000.tar.gz.enc",
            "notes.txt",
        ]);
        assert_eq!(select_expired(&all, "nas", 0).len(), 1);
    }
}
