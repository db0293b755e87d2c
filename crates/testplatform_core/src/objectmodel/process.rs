//! Process start information exchanged with launchers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Everything needed to start a process: what to run, with which arguments, where, and with which environment.
///
/// This is what the host supervisor computes for a test host and what a custom launcher (an IDE attaching a
/// debugger) receives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestProcessStartInfo {
    pub file_name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

impl TestProcessStartInfo {
    /// Split `arguments` on whitespace, honoring double quotes.
    pub fn argument_list(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut has_token = false;

        for ch in self.arguments.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    has_token = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if has_token {
                        args.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            }
        }
        if has_token {
            args.push(current);
        }
        args
    }
}
