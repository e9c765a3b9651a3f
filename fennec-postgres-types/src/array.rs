use super::{Error, Value};

/// Parse a PostgreSQL array literal (`{a,b,NULL,"c d"}`) into a JSON array.
///
/// `convert` maps each unquoted element text to a value; quoted elements are
/// always strings. Nested arrays recurse.
pub fn parse_pg_array<F>(s: &str, convert: &F) -> Result<Value, Error>
where
    F: Fn(&str) -> Result<Value, Error>,
{
    let mut chars = s.trim().chars().peekable();
    if chars.next() != Some('{') {
        return Err(Error::Array(s.to_string()));
    }

    let json = parse_elements(&mut chars, s, convert)?;

    if chars.next().is_some() {
        return Err(Error::Array(s.to_string()));
    }

    Ok(Value::Json(serde_json::Value::Array(json)))
}

fn parse_elements<F>(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    original: &str,
    convert: &F,
) -> Result<Vec<serde_json::Value>, Error>
where
    F: Fn(&str) -> Result<Value, Error>,
{
    let mut elements = vec![];
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;

    loop {
        let c = match chars.next() {
            Some(c) => c,
            None => return Err(Error::Array(original.to_string())),
        };

        match c {
            '"' if !quoted => {
                quoted = true;
                was_quoted = true;
            }
            '"' if quoted => quoted = false,
            '\\' if quoted => {
                let escaped = chars.next().ok_or_else(|| Error::Array(original.to_string()))?;
                current.push(escaped);
            }
            '{' if !quoted && current.is_empty() && !was_quoted => {
                let nested = parse_elements(chars, original, convert)?;
                elements.push(serde_json::Value::Array(nested));
                // Swallow the separator the nested close left for us.
                if chars.peek() == Some(&',') {
                    chars.next();
                }
                continue;
            }
            ',' | '}' if !quoted => {
                if !current.is_empty() || was_quoted {
                    elements.push(element_to_json(&current, was_quoted, convert)?);
                }
                current.clear();
                was_quoted = false;
                if c == '}' {
                    return Ok(elements);
                }
            }
            _ => current.push(c),
        }
    }
}

fn element_to_json<F>(text: &str, was_quoted: bool, convert: &F) -> Result<serde_json::Value, Error>
where
    F: Fn(&str) -> Result<Value, Error>,
{
    if !was_quoted && text.eq_ignore_ascii_case("null") {
        return Ok(serde_json::Value::Null);
    }

    let value = if was_quoted {
        Value::String(text.to_string())
    } else {
        convert(text)?
    };

    Ok(serde_json::to_value(&value)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn as_text(s: &str) -> Result<Value, Error> {
        Ok(Value::String(s.to_string()))
    }

    fn as_int(s: &str) -> Result<Value, Error> {
        super::super::parse_pg_int8(s)
    }

    #[test]
    fn test_text_array() {
        let v = parse_pg_array(r#"{a,b,NULL,"c d","say \"hi\""}"#, &as_text).unwrap();
        assert_eq!(
            serde_json::to_string(&v).unwrap(),
            r#"["a","b",null,"c d","say \"hi\""]"#
        );
    }

    #[test]
    fn test_int_array() {
        let v = parse_pg_array("{1,2,3}", &as_int).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[1,2,3]");
    }

    #[test]
    fn test_empty_array() {
        let v = parse_pg_array("{}", &as_text).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[]");
    }

    #[test]
    fn test_nested() {
        let v = parse_pg_array("{{1,2},{3,4}}", &as_int).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[[1,2],[3,4]]");
    }

    #[test]
    fn test_quoted_null_is_string() {
        let v = parse_pg_array(r#"{"NULL"}"#, &as_text).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"["NULL"]"#);
    }

    #[test]
    fn test_malformed() {
        assert!(parse_pg_array("1,2,3", &as_int).is_err());
        assert!(parse_pg_array("{1,2", &as_int).is_err());
    }
}
