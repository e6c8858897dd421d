use super::{DslError, DslNode, NodeType, Param};

#[derive(Clone, Copy)]
enum Separator {
    Arrow,
    Comma,
}

/// Parses a sequence of steps.
///
/// ```text
/// sequence ::= segment ('->' segment)*
/// segment  ::= id | '(' kind ',' id (',' param)* ')'
/// param    ::= number | sequence
/// ```
///
/// Blank input yields an empty sequence.
pub fn parse_dsl(text: &str) -> Result<Vec<DslNode>, DslError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    check_balanced(text)?;
    parse_sequence(text, None)
}

fn check_balanced(text: &str) -> Result<(), DslError> {
    let mut open: Vec<usize> = Vec::new();
    for (position, byte) in text.bytes().enumerate() {
        match byte {
            b'(' => open.push(position),
            b')' => {
                if open.pop().is_none() {
                    return Err(DslError::Unbalanced { position });
                }
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(position) => Err(DslError::Unbalanced { position }),
        None => Ok(()),
    }
}

/// Splits on separators outside of any parentheses. Parts are trimmed.
fn split_top_level(text: &str, separator: Separator) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth: isize = 0;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'-' if depth == 0 && matches!(separator, Separator::Arrow) && bytes.get(i + 1) == Some(&b'>') => {
                parts.push(text[start..i].trim());
                i += 2;
                start = i;
                continue;
            }
            b',' if depth == 0 && matches!(separator, Separator::Comma) => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[start..].trim());
    parts
}

fn parse_sequence(text: &str, iteration: Option<&str>) -> Result<Vec<DslNode>, DslError> {
    split_top_level(text, Separator::Arrow)
        .into_iter()
        .map(|segment| parse_segment(segment, iteration))
        .collect()
}

fn parse_segment(segment: &str, iteration: Option<&str>) -> Result<DslNode, DslError> {
    if segment.is_empty() {
        return Err(DslError::EmptySegment);
    }

    let mut node = if segment.starts_with('(') {
        parse_complex(segment, iteration)?
    } else if segment.contains(['(', ')', ',']) {
        return Err(DslError::Malformed(segment.to_string()));
    } else {
        DslNode::plain(segment)
    };

    if let Some(id) = iteration {
        node.iteration_id = Some(id.to_string());
        node.iteration_index = Some(0);
    }
    Ok(node)
}

fn parse_complex(segment: &str, iteration: Option<&str>) -> Result<DslNode, DslError> {
    // the opening parenthesis must close at the very end of the segment
    if closing_paren(segment) != Some(segment.len() - 1) {
        return Err(DslError::Malformed(segment.to_string()));
    }
    let inner = &segment[1..segment.len() - 1];
    let mut parts = split_top_level(inner, Separator::Comma).into_iter();

    let kind = parts.next().unwrap_or_default();
    let node_type: NodeType = kind.parse()?;
    let node_id = match parts.next() {
        Some(id) if !id.is_empty() && !id.contains(['(', ')']) => id.to_string(),
        _ => return Err(DslError::MissingId { kind: kind.to_string() }),
    };

    // an iteration scopes its children, other kinds pass the scope through
    let scope = match node_type {
        NodeType::Iteration => Some(node_id.as_str()),
        _ => iteration,
    };
    let params = parts
        .map(|param| parse_param(param, scope))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DslNode {
        node_type,
        node_id,
        params,
        iteration_id: None,
        iteration_index: None,
    })
}

fn parse_param(text: &str, iteration: Option<&str>) -> Result<Param, DslError> {
    if text.is_empty() {
        return Err(DslError::EmptySegment);
    }
    if looks_numeric(text) {
        if let Ok(number) = text.parse::<f64>() {
            return Ok(Param::Number(number));
        }
    }
    let mut steps = parse_sequence(text, iteration)?;
    if steps.len() == 1 {
        Ok(Param::Node(steps.remove(0)))
    } else {
        Ok(Param::Sequence(steps))
    }
}

fn looks_numeric(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        && text.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

/// Byte offset of the parenthesis closing the one at offset 0.
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, byte) in text.bytes().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
