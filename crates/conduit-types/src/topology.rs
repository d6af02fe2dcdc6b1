//! Stream description resolution.
//!
//! A stream is written as a `|`-separated chain of stage elements:
//!
//! ```text
//! http --port=9000 | transform --expression='a | b' | log
//! ```
//!
//! Each element is a stage kind, optionally prefixed with an explicit type
//! (`job:cleanup`), followed by `--name=value` parameters. Values may be
//! single- or double-quoted to carry whitespace or `|`.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::TopologyError;
use crate::stage::{Parameters, StageDescriptor, StageType};

static KIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid kind regex"));

static PARAM_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$").expect("valid parameter regex"));

static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid group regex"));

/// Generate a group name for streams deployed without one.
#[must_use]
pub fn generate_group() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("stream-{}", &id[..8])
}

/// Resolve a stream description into ordered stage descriptors.
///
/// Types are inferred by position (first = source, last = sink, interior =
/// processor) unless an element carries an explicit type prefix, which then
/// applies to that element only.
///
/// # Errors
///
/// Returns [`TopologyError::Empty`] when the description has no elements,
/// [`TopologyError::InvalidGroup`] for a bad group name, and
/// [`TopologyError::Syntax`] for a malformed element.
pub fn resolve(
    description: &str,
    group: Option<&str>,
) -> Result<Vec<StageDescriptor>, TopologyError> {
    let group = match group {
        Some(g) if GROUP_RE.is_match(g) => g.to_string(),
        Some(g) => return Err(TopologyError::InvalidGroup(g.to_string())),
        None => generate_group(),
    };

    let elements = split_elements(description)?;
    if elements.len() == 1 && elements[0].trim().is_empty() {
        return Err(TopologyError::Empty);
    }

    let last = elements.len() - 1;
    let mut descriptors = Vec::with_capacity(elements.len());
    for (i, element) in elements.iter().enumerate() {
        let parsed = parse_element(i, element)?;
        let positional = if i == 0 {
            StageType::Source
        } else if i == last {
            StageType::Sink
        } else {
            StageType::Processor
        };
        let index = u32::try_from(i).map_err(|_| TopologyError::syntax(i, "too many stages"))?;
        descriptors.push(StageDescriptor {
            group: group.clone(),
            stage_type: parsed.explicit_type.unwrap_or(positional),
            kind: parsed.kind,
            index,
            parameters: parsed.parameters,
        });
    }
    Ok(descriptors)
}

struct ParsedElement {
    explicit_type: Option<StageType>,
    kind: String,
    parameters: Parameters,
}

/// Split on `|` outside of quotes. Quotes are kept for the tokenizer.
fn split_elements(description: &str) -> Result<Vec<String>, TopologyError> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in description.chars() {
        match (quote, c) {
            (None, '|') => elements.push(std::mem::take(&mut current)),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), _) if q == c => {
                quote = None;
                current.push(c);
            }
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return Err(TopologyError::syntax(elements.len(), "unterminated quote"));
    }
    elements.push(current);
    Ok(elements)
}

/// Whitespace tokenizer that strips quotes.
fn tokenize(element: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in element.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                in_token = true;
            }
            (Some(q), _) if q == c => quote = None,
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            _ => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn parse_element(i: usize, element: &str) -> Result<ParsedElement, TopologyError> {
    let tokens = tokenize(element);
    let Some((head, rest)) = tokens.split_first() else {
        return Err(TopologyError::syntax(i, "empty stage"));
    };

    let (explicit_type, kind) = match head.split_once(':') {
        Some((prefix, kind)) => {
            let stage_type = StageType::parse(prefix).ok_or_else(|| {
                TopologyError::syntax(i, format!("unknown stage type '{prefix}'"))
            })?;
            (Some(stage_type), kind)
        }
        None => (None, head.as_str()),
    };
    if !KIND_RE.is_match(kind) {
        return Err(TopologyError::syntax(i, format!("invalid stage kind '{kind}'")));
    }

    let mut parameters = Parameters::new();
    for token in rest {
        let Some(option) = token.strip_prefix("--") else {
            return Err(TopologyError::syntax(
                i,
                format!("expected --name=value, found '{token}'"),
            ));
        };
        let Some((name, value)) = option.split_once('=') else {
            return Err(TopologyError::syntax(
                i,
                format!("parameter '{option}' has no value"),
            ));
        };
        if !PARAM_NAME_RE.is_match(name) {
            return Err(TopologyError::syntax(
                i,
                format!("invalid parameter name '{name}'"),
            ));
        }
        if parameters
            .insert(name.to_string(), value.to_string())
            .is_some()
        {
            return Err(TopologyError::syntax(
                i,
                format!("duplicate parameter '{name}'"),
            ));
        }
    }

    Ok(ParsedElement {
        explicit_type,
        kind: kind.to_string(),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn summary(descriptors: &[StageDescriptor]) -> Vec<(String, u32, StageType, String)> {
        descriptors
            .iter()
            .map(|d| (d.group.clone(), d.index, d.stage_type, d.kind.clone()))
            .collect()
    }

    #[test]
    fn three_stage_chain_infers_types_by_position() {
        let stages = resolve("A | B | C", Some("g1")).unwrap();
        assert_eq!(
            summary(&stages),
            vec![
                ("g1".into(), 0, StageType::Source, "A".into()),
                ("g1".into(), 1, StageType::Processor, "B".into()),
                ("g1".into(), 2, StageType::Sink, "C".into()),
            ]
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn blank_description_is_empty(#[case] input: &str) {
        assert_eq!(resolve(input, Some("g1")), Err(TopologyError::Empty));
    }

    #[rstest]
    #[case("a || b", 1)]
    #[case("a | ", 1)]
    #[case("| a", 0)]
    #[case("a | 9lives", 1)]
    #[case("a --port 9000 | b", 0)]
    #[case("a --port | b", 0)]
    #[case("a --x=1 --x=2", 0)]
    #[case("a | b --msg='oops", 1)]
    #[case("widget:a | b", 0)]
    #[case("a | b --=1", 1)]
    fn malformed_elements_report_position(#[case] input: &str, #[case] element: usize) {
        match resolve(input, Some("g1")) {
            Err(TopologyError::Syntax { element: e, .. }) => assert_eq!(e, element, "{input}"),
            other => panic!("expected syntax error for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn parameters_are_collected() {
        let stages = resolve("http --port=9000 | log --level=WARN --name=out", Some("s")).unwrap();
        assert_eq!(stages[0].parameters["port"], "9000");
        assert_eq!(stages[1].parameters.len(), 2);
        assert_eq!(stages[1].parameters["level"], "WARN");
    }

    #[test]
    fn quoted_values_may_contain_delimiters() {
        let stages =
            resolve(r#"http | transform --expr='a | b' --label="x y" | log"#, Some("q")).unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[1].parameters["expr"], "a | b");
        assert_eq!(stages[1].parameters["label"], "x y");
    }

    #[test]
    fn explicit_job_overrides_only_its_element() {
        let stages = resolve("a | job:b | c", Some("g")).unwrap();
        assert_eq!(stages[0].stage_type, StageType::Source);
        assert_eq!(stages[1].stage_type, StageType::Job);
        assert_eq!(stages[1].kind, "b");
        assert_eq!(stages[2].stage_type, StageType::Sink);

        let tail = resolve("a | job:cleanup", Some("g")).unwrap();
        assert_eq!(tail[1].stage_type, StageType::Job);
    }

    #[test]
    fn single_element_is_a_source() {
        let stages = resolve("time", Some("g")).unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].stage_type, StageType::Source);
    }

    #[test]
    fn missing_group_is_generated() {
        let a = resolve("a | b", None).unwrap();
        let b = resolve("a | b", None).unwrap();
        assert!(a[0].group.starts_with("stream-"));
        assert_eq!(a[0].group, a[1].group);
        assert_ne!(a[0].group, b[0].group);
    }

    #[test]
    fn invalid_group_is_rejected() {
        assert!(matches!(
            resolve("a | b", Some("bad group")),
            Err(TopologyError::InvalidGroup(_))
        ));
        assert!(matches!(
            resolve("a | b", Some("g.1")),
            Err(TopologyError::InvalidGroup(_))
        ));
    }
}
