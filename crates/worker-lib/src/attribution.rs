//! Instance name attribution
//!
//! Workloads are named `<deployment>-<project id>` and pods add the two
//! generated suffix tokens, so ownership can be recovered from the name
//! alone. Anything that does not follow the convention (system pods,
//! foreign volumes) is simply not ours and is skipped.

use crate::models::InstanceName;
use regex::Regex;
use std::sync::OnceLock;

const POD_PATTERN: &str = r"^(.+)-(\d+)-[^-]+-[^-]+$";
const SERVICE_PATTERN: &str = r"^(.+)-(\d+)$";
const VOLUME_PATTERN: &str = r"^(.+)-(\d+)$";

static POD_GRAMMAR: OnceLock<Regex> = OnceLock::new();
static SERVICE_GRAMMAR: OnceLock<Regex> = OnceLock::new();
static VOLUME_GRAMMAR: OnceLock<Regex> = OnceLock::new();

/// Naming convention an instance identifier is expected to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    /// `<name>-<project>-<token>-<token>`
    Pod,
    /// `<name>-<project>`
    Service,
    /// `<name>-<project>`
    Volume,
}

impl Grammar {
    fn regex(self) -> &'static Regex {
        let (cell, pattern) = match self {
            Grammar::Pod => (&POD_GRAMMAR, POD_PATTERN),
            Grammar::Service => (&SERVICE_GRAMMAR, SERVICE_PATTERN),
            Grammar::Volume => (&VOLUME_GRAMMAR, VOLUME_PATTERN),
        };
        cell.get_or_init(|| Regex::new(pattern).expect("attribution pattern is valid"))
    }
}

/// Owner of an instance recovered from its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub name: String,
    pub project_id: i64,
}

/// Match `input` against `grammar`.
///
/// Returns `None` unless the pattern matches the whole string exactly once
/// with both groups captured and a non-zero project id.
pub fn attribute(input: &str, grammar: Grammar) -> Option<Attribution> {
    let re = grammar.regex();

    let mut matches = re.captures_iter(input);
    let caps = matches.next()?;
    if matches.next().is_some() || caps.len() != 3 {
        return None;
    }

    let name = caps.get(1)?.as_str();
    let project_id: i64 = caps.get(2)?.as_str().parse().ok()?;
    if project_id == 0 {
        return None;
    }

    Some(Attribution {
        name: name.to_string(),
        project_id,
    })
}

/// Attribute a raw instance using the grammar implied by its label
pub fn attribute_instance(instance: &InstanceName) -> Option<Attribution> {
    match instance {
        InstanceName::Pod(name) => attribute(name, Grammar::Pod),
        InstanceName::Service(name) => attribute(name, Grammar::Service),
        InstanceName::Volume(name) => attribute(name, Grammar::Volume),
    }
}
