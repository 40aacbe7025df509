//! Tokenizer for `qstat -f` output
//!
//! `qstat -f` prints one attribute per line as `    name = value`, wraps long
//! values onto tab-indented continuation lines and starts with a
//! `Job Id: <id>` header. Lookups never scan past the parsed attributes: a
//! missing attribute is reported as `None`.

use crate::models::{JobRecord, JobState};

const HEADER_PREFIX: &str = "Job Id:";

/// Attributes of a single job as printed by `qstat -f`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QstatAttributes {
    job_id: Option<String>,
    attributes: Vec<(String, String)>,
}

impl QstatAttributes {
    /// Parse the full text of a `qstat -f` answer for one job.
    ///
    /// Unrecognised lines are skipped. When the same attribute appears more
    /// than once the first occurrence wins.
    pub fn parse(text: &str) -> Self {
        let mut parsed = Self::default();

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            if let Some(rest) = line.trim_start().strip_prefix(HEADER_PREFIX) {
                if parsed.job_id.is_none() {
                    parsed.job_id = Some(rest.trim().to_string());
                }
                continue;
            }

            if line.starts_with('\t') {
                if let Some((_, value)) = parsed.attributes.last_mut() {
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = line.split_once(" = ") {
                let name = name.trim();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    parsed
                        .attributes
                        .push((name.to_string(), value.trim().to_string()));
                }
            }
        }

        parsed
    }

    /// The id from the `Job Id:` header, if present
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Look up an attribute, `None` when it is absent or empty
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Fold the attributes into a [`JobRecord`] for `job_id`
    pub fn into_job_record(self, job_id: &str) -> JobRecord {
        let state_code = self.get("job_state").map(str::to_string);
        JobRecord {
            job_id: self.job_id.clone().unwrap_or_else(|| job_id.to_string()),
            state: JobState::from_code(state_code.as_deref()),
            state_code,
            substate: self.get("substate").map(str::to_string),
            exec_host: self.get("exec_host").map(str::to_string),
            comment: self.get("comment").map(str::to_string),
        }
    }
}

/// Parse `qstat -f` text into a [`JobRecord`]
pub fn parse_job_record(job_id: &str, text: &str) -> JobRecord {
    QstatAttributes::parse(text).into_job_record(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: &str = "Job Id: 1042.pbs-server\n    \
Job_Name = web-7f9c\n    \
Job_Owner = k8s@pbs-server\n    \
job_state = R\n    \
queue = workq\n    \
exec_host = nodeA/0\n    \
exec_vnode = (nodeA:ncpus=1:mem=524288kb)\n    \
comment = Job run at Tue Mar 05 at 10:12 on (nodeA:ncpus=1:mem=524288kb)\n    \
substate = 42\n    \
Variable_List = PODNAME=web-7f9c,PBS_O_HOME=/root,PBS_O_LOGNAME=root,\n\
\tPBS_O_WORKDIR=/root\n";

    #[test]
    fn test_parse_running_job() {
        let attrs = QstatAttributes::parse(RUNNING);
        assert_eq!(attrs.job_id(), Some("1042.pbs-server"));
        assert_eq!(attrs.get("job_state"), Some("R"));
        assert_eq!(attrs.get("substate"), Some("42"));
        assert_eq!(attrs.get("exec_host"), Some("nodeA/0"));
        assert_eq!(attrs.get("Job_Name"), Some("web-7f9c"));
    }

    #[test]
    fn test_continuation_lines_are_joined() {
        let attrs = QstatAttributes::parse(RUNNING);
        assert_eq!(
            attrs.get("Variable_List"),
            Some("PODNAME=web-7f9c,PBS_O_HOME=/root,PBS_O_LOGNAME=root,PBS_O_WORKDIR=/root")
        );
    }

    #[test]
    fn test_record_from_running_job() {
        let record = parse_job_record("1042", RUNNING);
        assert_eq!(record.job_id, "1042.pbs-server");
        assert_eq!(record.state, JobState::Running);
        assert_eq!(record.substate.as_deref(), Some("42"));
        assert_eq!(record.assigned_host().as_deref(), Some("nodeA"));
        assert!(record.comment.unwrap().starts_with("Job run at"));
    }

    #[test]
    fn test_queued_job_has_no_exec_host() {
        let text = "Job Id: 7.pbs\n    job_state = Q\n    substate = 10\n    \
comment = Not Running: Insufficient amount of resource: ncpus\n";
        let record = parse_job_record("7.pbs", text);
        assert_eq!(record.state, JobState::Submitted);
        assert_eq!(record.substate.as_deref(), Some("10"));
        assert_eq!(record.exec_host, None);
        assert_eq!(
            record.comment.as_deref(),
            Some("Not Running: Insufficient amount of resource: ncpus")
        );
    }

    #[test]
    fn test_missing_fields_are_absent() {
        let record = parse_job_record("9.pbs", "Job Id: 9.pbs\n    queue = workq\n");
        assert_eq!(record.state, JobState::Unknown);
        assert_eq!(record.state_code, None);
        assert_eq!(record.substate, None);
        assert_eq!(record.exec_host, None);
    }

    #[test]
    fn test_garbage_input_yields_empty_attributes() {
        for text in ["", "\n\n", "job_state", "= R", "qstat: error\n\tcontinued", "job_state =\n"] {
            let attrs = QstatAttributes::parse(text);
            assert_eq!(attrs.get("job_state"), None, "input {:?}", text);
        }

        let record = parse_job_record("3.pbs", "no attributes here");
        assert_eq!(record.job_id, "3.pbs");
        assert_eq!(record.state, JobState::Unknown);
    }

    #[test]
    fn test_values_containing_separator_are_kept_whole() {
        let attrs = QstatAttributes::parse("    Resource_List.select = 1:ncpus=500:mem=512MB\n    note = a = b\n");
        assert_eq!(attrs.get("Resource_List.select"), Some("1:ncpus=500:mem=512MB"));
        assert_eq!(attrs.get("note"), Some("a = b"));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let attrs = QstatAttributes::parse("Job Id: 5.pbs\r\n    job_state = F\r\n    substate = 92\r\n");
        assert_eq!(attrs.get("job_state"), Some("F"));
        assert_eq!(attrs.get("substate"), Some("92"));
    }
}
