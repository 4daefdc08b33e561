use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpecifier {
    pub service: String,
    pub section: String,
    pub sub_section: Option<String>,
    pub config: String,
    pub transform: Option<TransformSpec>,
}

impl TargetSpecifier {
    /// Key path of the targeted field inside the service's configuration.
    pub fn config_path(&self) -> Vec<String> {
        let mut path = vec![self.section.clone()];
        if let Some(sub_section) = &self.sub_section {
            path.push(sub_section.clone());
        }
        path.push(self.config.clone());
        path
    }
}

impl FromStr for TargetSpecifier {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let spec = value.trim();
        let (path, transform) = match spec.split_once('!') {
            Some((path, transform)) => (path, Some(parse_transform(transform)?)),
            None => (spec, None),
        };

        let segments: Vec<&str> = path.split('/').map(str::trim).collect();
        let [service, section_and_sub, config] = segments.as_slice() else {
            return Err(Error::InvalidTarget(format!(
                "'{spec}' must have the form service/section[.subsection]/config"
            )));
        };

        let (section, sub_section) = match section_and_sub.split_once('.') {
            Some((section, sub_section)) => (section, Some(sub_section.to_owned())),
            None => (*section_and_sub, None),
        };

        if service.is_empty()
            || section.is_empty()
            || config.is_empty()
            || sub_section.as_deref() == Some("")
        {
            return Err(Error::InvalidTarget(format!("'{spec}' has an empty path segment")));
        }

        Ok(Self {
            service: (*service).to_owned(),
            section: section.to_owned(),
            sub_section,
            config: (*config).to_owned(),
            transform,
        })
    }
}

impl fmt::Display for TargetSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.section)?;
        if let Some(sub_section) = &self.sub_section {
            write!(f, ".{sub_section}")?;
        }
        write!(f, "/{}", self.config)?;
        if let Some(transform) = &self.transform {
            write!(f, "!{}", transform.name)?;
            if !transform.args.is_empty() {
                write!(f, "({})", transform.args.join(","))?;
            }
        }
        Ok(())
    }
}

fn transform_call_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*)\((.*)\)$").expect("static regex compiles"))
}

fn description_targets_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(.*)\]").expect("static regex compiles"))
}

fn parse_transform(clause: &str) -> Result<TransformSpec> {
    let clause = clause.trim();
    let (name, args) = match transform_call_regex().captures(clause) {
        Some(captures) => {
            let name = captures.get(1).map_or("", |m| m.as_str()).trim();
            let args = captures.get(2).map_or("", |m| m.as_str());
            let args = if args.trim().is_empty() {
                Vec::new()
            } else {
                args.split(',').map(|arg| arg.trim().to_owned()).collect()
            };
            (name, args)
        }
        None => (clause, Vec::new()),
    };

    if name.is_empty() {
        return Err(Error::InvalidTarget(format!("transform clause '{clause}' has no name")));
    }

    Ok(TransformSpec {
        name: name.to_owned(),
        args,
    })
}

fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in list.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&list[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

pub fn parse_targets(list: &str) -> Result<Vec<TargetSpecifier>> {
    split_top_level(list)
        .into_iter()
        .filter(|spec| !spec.trim().is_empty())
        .map(TargetSpecifier::from_str)
        .collect()
}

/// Targets of one stack output. An explicit target list wins over a list
/// bracketed inside the human-readable description; no annotation at all
/// yields no targets.
pub fn targets_for_output(
    description: Option<&str>,
    explicit: Option<&[String]>,
) -> Result<Vec<TargetSpecifier>> {
    if let Some(explicit) = explicit {
        let mut targets = Vec::new();
        for entry in explicit {
            targets.extend(parse_targets(entry)?);
        }
        return Ok(targets);
    }

    let bracketed = description
        .and_then(|text| description_targets_regex().captures(text))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str());

    match bracketed {
        Some(list) => parse_targets(list),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: &str) -> TargetSpecifier {
        value.parse().expect("valid specifier")
    }

    #[test]
    fn parses_plain_specifier() {
        let target = spec("reticulum/db/hostname");
        assert_eq!(target.service, "reticulum");
        assert_eq!(target.section, "db");
        assert_eq!(target.sub_section, None);
        assert_eq!(target.config, "hostname");
        assert_eq!(target.transform, None);
        assert_eq!(target.config_path(), vec!["db", "hostname"]);
    }

    #[test]
    fn parses_subsection_and_transform_arguments() {
        let target = spec("janus/web.tls/cert!read-s3-file-as-json(cert,chain)");
        assert_eq!(target.sub_section.as_deref(), Some("tls"));
        assert_eq!(
            target.transform,
            Some(TransformSpec {
                name: "read-s3-file-as-json".to_owned(),
                args: vec!["cert".to_owned(), "chain".to_owned()],
            })
        );
        assert_eq!(target.config_path(), vec!["web", "tls", "cert"]);
    }

    #[test]
    fn transform_without_arguments_has_empty_args() {
        let bare = spec("reticulum/db/password!read-aws-secret");
        let called = spec("reticulum/db/password!read-aws-secret()");
        assert_eq!(bare, called);
        assert!(bare.transform.expect("has transform").args.is_empty());
    }

    #[test]
    fn display_round_trips_every_form() {
        let forms = [
            "reticulum/db/hostname",
            "reticulum/db.pool/size",
            "reticulum/db/password!read-aws-secret",
            "janus/web.tls/cert!read-s3-file-as-json(cert)",
            "janus/web/key!read-s3-file-as-json(a,b,c)",
        ];
        for form in forms {
            let parsed = spec(form);
            assert_eq!(parsed.to_string(), form);
            assert_eq!(spec(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn splits_lists_but_not_argument_commas() {
        let targets =
            parse_targets("a/s/c!read-s3-file-as-json(x,y), b/s.sub/c ,c/s/c").expect("valid list");
        assert_eq!(targets.len(), 3);
        assert_eq!(
            targets[0].transform.as_ref().map(|t| t.args.clone()),
            Some(vec!["x".to_owned(), "y".to_owned()])
        );
        assert_eq!(targets[1].service, "b");
        assert_eq!(targets[2].service, "c");
    }

    #[test]
    fn description_and_explicit_forms_agree() {
        let from_description = targets_for_output(
            Some("Database host [reticulum/db/hostname,ita/db/hostname]"),
            None,
        )
        .expect("valid description");
        let explicit = vec!["reticulum/db/hostname".to_owned(), "ita/db/hostname".to_owned()];
        let from_field = targets_for_output(None, Some(&explicit)).expect("valid field");
        assert_eq!(from_description, from_field);
        assert_eq!(from_field.len(), 2);
    }

    #[test]
    fn unannotated_outputs_have_no_targets() {
        assert!(targets_for_output(Some("just a description"), None)
            .expect("no brackets")
            .is_empty());
        assert!(targets_for_output(None, None).expect("nothing").is_empty());
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["reticulum/db", "a/b/c/d", "/db/x", "a/.sub/c", "a/b/c!"] {
            let error = bad.parse::<TargetSpecifier>().expect_err(bad);
            assert!(matches!(error, Error::InvalidTarget(_)), "{bad}");
        }
    }
}
