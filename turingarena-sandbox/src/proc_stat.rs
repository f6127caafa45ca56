use std::path::PathBuf;

use nix::unistd::Pid;

use crate::MonitorError;

/// The fields of `/proc/<pid>/stat` the monitor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcStat {
    /// One of `R`, `S`, `D`, `Z`, `T`, ...
    pub state: char,
    /// Resident set size, in pages.
    pub rss_pages: u64,
}

/// Parse the content of a stat file. The command name may contain spaces and parentheses, so the
/// fields are searched after the last `") "`.
pub(crate) fn parse_stat(content: &str) -> Option<ProcStat> {
    let (_, fields) = content.rsplit_once(") ")?;
    let fields: Vec<&str> = fields.split_whitespace().collect();
    let state = fields.first()?.chars().next()?;
    // rss is the 24th field, the 22nd after the command
    let rss_pages = fields.get(21)?.parse().ok()?;
    Some(ProcStat { state, rss_pages })
}

pub(crate) fn proc_path(pid: Pid, file: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{}/{}", pid, file))
}

pub(crate) fn read_stat(pid: Pid) -> Result<ProcStat, MonitorError> {
    let path = proc_path(pid, "stat");
    let content =
        std::fs::read_to_string(&path).map_err(|source| MonitorError::ProcessDisappeared {
            pid: pid.as_raw(),
            path,
            source,
        })?;
    parse_stat(&content).ok_or_else(|| MonitorError::MalformedStat {
        pid: pid.as_raw(),
        stat: content.clone(),
    })
}

/// Reset the peak resident set size of the process.
pub(crate) fn clear_refs(pid: Pid) -> Result<(), MonitorError> {
    std::fs::write(proc_path(pid, "clear_refs"), "5").map_err(|source| MonitorError::ClearRefs {
        pid: pid.as_raw(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "1234 (a) b (c)) S 1 1234 1234 0 -1 4194560 97 0 0 0 0 0 0 0 20 0 1 0 \
                        123456 2678784 183 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 \
                        0 0 0 0";

    #[test]
    fn test_parse_stat() {
        assert_eq!(
            parse_stat(STAT),
            Some(ProcStat {
                state: 'S',
                rss_pages: 183
            })
        );
    }

    #[test]
    fn test_parse_stat_malformed() {
        assert_eq!(parse_stat("1234 (cmd"), None);
        assert_eq!(parse_stat("1234 (cmd) R 1 2"), None);
    }

    #[test]
    fn test_read_own_stat() {
        let stat = read_stat(Pid::this()).unwrap();
        assert_eq!(stat.state, 'R');
        assert!(stat.rss_pages > 0);
    }
}
