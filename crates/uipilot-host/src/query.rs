use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use uipilot_model::descendants;
use uipilot_model::same_node;
use uipilot_model::NodeRef;

use crate::error::QueryError;
use crate::serialize::SerializerChain;

/// One step of a tree query.
///
/// Queries are concatenated segments, each introduced by its prefix
/// character: `/Type` collects descendants of a declared type, `~Name`
/// matches assigned names, `.Property` descends into a property value,
/// `[n]` picks the nth candidate and `[Property=value]` filters candidates
/// by a property's serialized value.
///
/// `~Name` directly after `/Type` narrows that type match instead of
/// starting a fresh descent, so `/Grid~MyGrid` means "the Grid named
/// MyGrid", not "a MyGrid somewhere under any Grid".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    TypeMatch(String),
    NameMatch(String),
    PropertyDescent(String),
    IndexSelect(usize),
    PropertyValueMatch { property: String, value: String },
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::TypeMatch(name) => write!(f, "/{name}"),
            Segment::NameMatch(name) => write!(f, "~{name}"),
            Segment::PropertyDescent(name) => write!(f, ".{name}"),
            Segment::IndexSelect(index) => write!(f, "[{index}]"),
            Segment::PropertyValueMatch { property, value } => write!(f, "[{property}={value}]"),
        }
    }
}

/// Splits a query string into segments, rejecting any text the segment
/// grammar does not cover.
pub fn parse_query(query: &str) -> Result<Vec<Segment>, QueryError> {
    static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = SEGMENT_RE.get_or_init(|| {
        Regex::new(r"/[^/~.\[\]]+|~[^/~.\[\]]+|\.[^/~.\[\]]+|\[[^\]]*\]").expect("segment regex")
    });

    let mut segments = Vec::new();
    let mut cursor = 0;
    for found in re.find_iter(query) {
        if found.start() != cursor {
            return Err(QueryError::Parse {
                position: cursor,
                reason: format!("unexpected text '{}'", &query[cursor..found.start()]),
            });
        }
        segments.push(lex_segment(found.as_str(), found.start())?);
        cursor = found.end();
    }
    if cursor != query.len() {
        return Err(QueryError::Parse {
            position: cursor,
            reason: format!("unexpected text '{}'", &query[cursor..]),
        });
    }
    if segments.is_empty() {
        return Err(QueryError::Parse {
            position: 0,
            reason: "query has no segments".to_string(),
        });
    }
    Ok(segments)
}

fn lex_segment(text: &str, position: usize) -> Result<Segment, QueryError> {
    if let Some(name) = text.strip_prefix('/') {
        return Ok(Segment::TypeMatch(name.to_string()));
    }
    if let Some(name) = text.strip_prefix('~') {
        return Ok(Segment::NameMatch(name.to_string()));
    }
    if let Some(name) = text.strip_prefix('.') {
        return Ok(Segment::PropertyDescent(name.to_string()));
    }

    // The regex only yields the three prefixes above or a bracket pair.
    let body = &text[1..text.len() - 1];
    if body.is_empty() {
        return Err(QueryError::Parse {
            position,
            reason: "empty selector '[]'".to_string(),
        });
    }
    if body.chars().all(|c| c.is_ascii_digit()) {
        let index = body.parse::<usize>().map_err(|_| QueryError::Parse {
            position,
            reason: format!("index '{body}' is out of range"),
        })?;
        return Ok(Segment::IndexSelect(index));
    }
    match body.split_once('=') {
        Some((property, _)) if property.is_empty() => Err(QueryError::Parse {
            position,
            reason: "selector has no property name before '='".to_string(),
        }),
        Some((property, value)) => Ok(Segment::PropertyValueMatch {
            property: property.to_string(),
            value: value.to_string(),
        }),
        None => Err(QueryError::Parse {
            position,
            reason: format!("selector '[{body}]' is neither an index nor property=value"),
        }),
    }
}

/// Resolves `query` against the live subtree under `root`.
///
/// The walk is re-done from scratch on every call; nothing about a prior
/// resolution is cached, so a mutated tree gives mutated answers. The
/// query must narrow to exactly one element: zero matches and multiple
/// matches are both reported, never silently disambiguated.
pub fn resolve(
    root: &NodeRef,
    query: &str,
    serializers: &SerializerChain,
) -> Result<NodeRef, QueryError> {
    let segments = parse_query(query)?;

    let mut candidates: Vec<NodeRef> = vec![root.clone()];
    let mut after_type = false;
    for segment in &segments {
        candidates = apply_segment(&candidates, segment, after_type, serializers)?;
        if candidates.is_empty() {
            return Err(QueryError::NotFound {
                segment: segment.to_string(),
            });
        }
        after_type = matches!(segment, Segment::TypeMatch(_));
    }

    let last = segments
        .last()
        .map(Segment::to_string)
        .unwrap_or_default();
    if candidates.len() > 1 {
        return Err(QueryError::Ambiguous {
            segment: last,
            count: candidates.len(),
        });
    }
    candidates
        .pop()
        .ok_or(QueryError::NotFound { segment: last })
}

fn apply_segment(
    candidates: &[NodeRef],
    segment: &Segment,
    after_type: bool,
    serializers: &SerializerChain,
) -> Result<Vec<NodeRef>, QueryError> {
    match segment {
        Segment::TypeMatch(type_name) => Ok(collect_descendants(candidates, |node| {
            node.type_name() == type_name
        })),

        Segment::NameMatch(name) => {
            if after_type {
                // Narrows the preceding type match in place.
                Ok(candidates
                    .iter()
                    .filter(|node| node.assigned_name().as_deref() == Some(name.as_str()))
                    .cloned()
                    .collect())
            } else {
                Ok(collect_descendants(candidates, |node| {
                    node.assigned_name().as_deref() == Some(name.as_str())
                }))
            }
        }

        Segment::IndexSelect(index) => candidates
            .get(*index)
            .cloned()
            .map(|node| vec![node])
            .ok_or_else(|| QueryError::NotFound {
                segment: segment.to_string(),
            }),

        Segment::PropertyValueMatch { property, value } => Ok(candidates
            .iter()
            .filter(|node| {
                node.property(property)
                    .and_then(|v| serializers.serialize(&v))
                    .as_deref()
                    == Some(value.as_str())
            })
            .cloned()
            .collect()),

        Segment::PropertyDescent(property) => {
            let node = match candidates {
                [node] => node,
                _ => {
                    return Err(QueryError::Ambiguous {
                        segment: segment.to_string(),
                        count: candidates.len(),
                    })
                }
            };
            let value = node
                .property(property)
                .ok_or_else(|| QueryError::NoSuchProperty {
                    property: property.clone(),
                })?;
            match value.as_element() {
                Some(element) => Ok(vec![element.clone()]),
                None => Err(QueryError::NotAnElement {
                    property: property.clone(),
                }),
            }
        }
    }
}

/// Walks each candidate's subtree in depth-first pre-order and keeps the
/// nodes `keep` accepts. Nested candidates can reach the same node twice,
/// so duplicates are dropped while preserving first-visit order.
fn collect_descendants<F>(candidates: &[NodeRef], keep: F) -> Vec<NodeRef>
where
    F: Fn(&NodeRef) -> bool,
{
    let mut out: Vec<NodeRef> = Vec::new();
    for candidate in candidates {
        for node in descendants(candidate) {
            if keep(&node) && !out.iter().any(|seen| same_node(seen, &node)) {
                out.push(node);
            }
        }
    }
    out
}
