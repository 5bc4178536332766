// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Banners for a TOA run: the set-up summary and any collected warnings. Lines
//! are logged, so they go wherever the logger sends them.

use std::{borrow::Cow, sync::Mutex};

lazy_static::lazy_static! {
    static ref WARNINGS: Mutex<Vec<Cow<'static, str>>> = Mutex::new(vec![]);
}

/// Prefix each line with a tree branch; the last gets the closing branch.
pub(super) fn tree_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let last = lines.len().saturating_sub(1);
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let branch = if i == last { '└' } else { '├' };
            format!("{branch} {}", line.as_ref())
        })
        .collect()
}

/// The summary of what a TOA run will do, printed once arguments are parsed.
pub(crate) struct RunSummary {
    title: &'static str,
    lines: Vec<Cow<'static, str>>,
}

impl RunSummary {
    pub(crate) fn new(title: &'static str) -> Self {
        Self {
            title,
            lines: vec![],
        }
    }

    pub(crate) fn line<S: Into<Cow<'static, str>>>(&mut self, line: S) {
        self.lines.push(line.into());
    }

    pub(crate) fn display(self) {
        log::info!("{}", console::style(self.title).bold());
        for line in tree_lines(self.lines.as_slice()) {
            log::info!("{line}");
        }
        log::info!("");
    }
}

/// Something to tell the user about before TOAs are made, but not worth
/// stopping for.
pub(crate) trait Warn {
    fn warn(self);
}

impl Warn for &'static str {
    fn warn(self) {
        WARNINGS.lock().unwrap().push(self.into());
    }
}

/// Log and clear the collected warnings.
pub(crate) fn display_warnings() {
    let mut warnings = WARNINGS.lock().unwrap();
    if warnings.is_empty() {
        return;
    }
    log::warn!("{}", console::style("Warnings").bold());
    for line in tree_lines(warnings.as_slice()) {
        log::warn!("{line}");
    }
    log::warn!("");
    warnings.clear();
}
