// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Argument role tags.
//!
//! The original design tags individual parameters as sources or
//! destinations via decorators applied to a dynamically-introspected
//! function signature. There's no equivalent attribute-on-parameter
//! mechanism available here, so each [`crate::functions::Action`]
//! implementation builds its [`RoleSet`] by hand from its own `Args`,
//! using the free functions below — the "struct field in a manually
//! declared descriptor" option.

use std::path::PathBuf;

/// The set of paths an invocation declared as sources and destinations,
/// partitioned out of its arguments (and, separately, its result).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleSet {
    pub srcs: Vec<PathBuf>,
    pub dsts: Vec<PathBuf>,
}

impl RoleSet {
    pub fn new() -> RoleSet {
        RoleSet::default()
    }

    pub fn merge(&mut self, other: RoleSet) {
        self.srcs.extend(other.srcs);
        self.dsts.extend(other.dsts);
    }
}

/// `SRC`: a single required source path.
pub fn src(path: &PathBuf) -> RoleSet {
    RoleSet {
        srcs: vec![path.clone()],
        dsts: vec![],
    }
}

/// `SRCS`: a list of required source paths.
pub fn srcs(paths: &[PathBuf]) -> RoleSet {
    RoleSet {
        srcs: paths.to_vec(),
        dsts: vec![],
    }
}

/// `OPTIONAL_SRC`: zero or one source path.
pub fn optional_src(path: &Option<PathBuf>) -> RoleSet {
    RoleSet {
        srcs: path.iter().cloned().collect(),
        dsts: vec![],
    }
}

/// `DST`: a single required destination path.
pub fn dst(path: &PathBuf) -> RoleSet {
    RoleSet {
        srcs: vec![],
        dsts: vec![path.clone()],
    }
}

/// `DSTS`: a list of required destination paths.
pub fn dsts(paths: &[PathBuf]) -> RoleSet {
    RoleSet {
        srcs: vec![],
        dsts: paths.to_vec(),
    }
}

/// `OPTIONAL_DST`: zero or one destination path.
pub fn optional_dst(path: &Option<PathBuf>) -> RoleSet {
    RoleSet {
        srcs: vec![],
        dsts: path.iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_roles_are_empty_when_absent() {
        let none: Option<PathBuf> = None;
        assert!(optional_src(&none).srcs.is_empty());
        assert!(optional_dst(&none).dsts.is_empty());
    }

    #[test]
    fn merge_combines_both_sides() {
        let mut a = src(&PathBuf::from("a"));
        a.merge(dst(&PathBuf::from("b")));
        assert_eq!(a.srcs, vec![PathBuf::from("a")]);
        assert_eq!(a.dsts, vec![PathBuf::from("b")]);
    }
}
