use {
    rootline_projects::{Candidate, Project, ScanReport, SyncResult},
    serde::Serialize,
};

/// Prints command results either as JSON or as human-readable lines.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn emit<T: Serialize>(
        &self,
        value: &T,
        human: impl FnOnce(&T) -> Vec<String>,
    ) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            for line in human(value) {
                println!("{line}");
            }
        }
        Ok(())
    }
}

pub fn project_line(p: &Project) -> String {
    let mut line = format!("{}  {}  {}", p.id, p.name, p.path.display());
    if let Some(key) = &p.identity_key {
        line.push_str(&format!("  [{key}]"));
    }
    line
}

pub fn project_lines(projects: &[Project]) -> Vec<String> {
    if projects.is_empty() {
        return vec!["No projects.".into()];
    }
    projects.iter().map(project_line).collect()
}

fn candidate_line(c: &Candidate) -> String {
    let key = c
        .identity_key
        .as_ref()
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".into());
    format!("{}  {}  {}  ({})", c.name, c.path.display(), key, c.tags.join(","))
}

pub fn scan_lines(report: &ScanReport) -> Vec<String> {
    let mut lines: Vec<String> = report.candidates.iter().map(candidate_line).collect();
    for w in &report.warnings {
        lines.push(format!("warning: {}: {}", w.path.display(), w.message));
    }
    lines.push(format!(
        "{} candidate(s), {} warning(s)",
        report.candidates.len(),
        report.warnings.len()
    ));
    lines
}

pub fn sync_lines(result: &SyncResult) -> Vec<String> {
    let mut lines = Vec::new();
    for p in &result.added {
        lines.push(format!("added     {}", project_line(p)));
    }
    for p in &result.updated {
        lines.push(format!("moved     {}", project_line(p)));
    }
    for c in &result.conflicts {
        lines.push(format!("conflict  {c}"));
    }
    for w in &result.warnings {
        lines.push(format!("warning   {}: {}", w.path.display(), w.message));
    }
    lines.push(format!(
        "{} added, {} updated, {} archived, {} unchanged",
        result.added.len(),
        result.updated.len(),
        result.archived_count,
        result.unchanged_count
    ));
    lines
}
