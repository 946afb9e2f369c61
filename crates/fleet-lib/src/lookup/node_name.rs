//! Node name grammar
//!
//! Node names follow `<name>-<template>-<partition>-<index>`. The name
//! and partition fields never contain hyphens, the index is a decimal
//! integer, and the template token absorbs any interior hyphens.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Error;

fn node_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<name>[^\s\-]+)-(?P<template>\S+)-(?P<partition>[^\s\-]+)-(?P<index>\d+)$")
            .expect("node name pattern is valid")
    })
}

/// A node name decomposed into its grammar fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeIdentifier {
    /// Cluster name prefix, never containing hyphens
    pub name: String,
    /// Template token, which may contain hyphens
    pub template: String,
    /// Partition name, never containing hyphens
    pub partition: String,
    /// Numeric suffix distinguishing nodes within a group
    pub index: u64,
}

impl NodeIdentifier {
    /// Parse a node name, rejecting anything outside the grammar.
    pub fn parse(node_name: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidNodeName(node_name.to_string());
        let caps = node_name_pattern().captures(node_name).ok_or_else(invalid)?;
        let index = caps["index"].parse().map_err(|_| invalid())?;
        Ok(Self {
            name: caps["name"].to_string(),
            template: caps["template"].to_string(),
            partition: caps["partition"].to_string(),
            index,
        })
    }
}

impl FromStr for NodeIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.name, self.template, self.partition, self.index
        )
    }
}
