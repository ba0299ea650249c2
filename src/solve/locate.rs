//! Site extraction: ties a query to the branch it arose from by scanning
//! the printed form of its expressions for a planted location tag.

use std::sync::OnceLock;

use regex::Regex;

use super::Query;

/// Site key reported when no expression in the query carries a tag.
pub const FALLBACK_SITE: &str = "loc:0";

fn loc_tag() -> &'static Regex {
    static LOC_TAG: OnceLock<Regex> = OnceLock::new();

    LOC_TAG.get_or_init(|| Regex::new(r"loc:(\d+)(?::branch:([01]))?").unwrap())
}

/// Returns the site key for `query`: the first `loc:<N>[:branch:<B>]` match
/// over the printed constraints (in order), then the goal.
pub fn extract_site(query: &Query) -> String {
    query
        .exprs()
        .find_map(|expr| scan(&expr.to_string()))
        .unwrap_or_else(|| FALLBACK_SITE.to_owned())
}

fn scan(text: &str) -> Option<String> {
    let caps = loc_tag().captures(text)?;

    Some(match caps.get(2) {
        Some(branch) => format!("loc:{}:branch:{}", &caps[1], branch.as_str()),
        None => format!("loc:{}", &caps[1]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Array, Expr};

    #[test]
    fn test_scan_variants() {
        assert_eq!(scan("(read loc:42 0:w32)"), Some("loc:42".to_owned()));
        assert_eq!(
            scan("(read loc:42:branch:1_x 0:w32)"),
            Some("loc:42:branch:1".to_owned())
        );
        assert_eq!(scan("(read input 0:w32)"), None);

        // A branch group outside {0, 1} does not extend the match.
        assert_eq!(scan("loc:3:branch:7"), Some("loc:3".to_owned()));
    }

    #[test]
    fn test_extract_prefers_earlier_constraints() {
        let tagged = Array::new("loc:7_a", 1);
        let other = Array::new("loc:9_b", 1);
        let query = Query::new(
            vec![
                Expr::eq(Expr::read_at(&tagged, 0), Expr::u8(1)),
                Expr::eq(Expr::read_at(&other, 0), Expr::u8(2)),
            ],
            Expr::bool(true),
        );

        assert_eq!(extract_site(&query), "loc:7");
    }

    #[test]
    fn test_extract_falls_back_to_goal_then_sentinel() {
        let tagged = Array::new("loc:5_a", 1);
        let query = Query::new(vec![], Expr::read_at(&tagged, 0));
        assert_eq!(extract_site(&query), "loc:5");

        let untagged = Array::new("input", 1);
        let query = Query::new(vec![], Expr::read_at(&untagged, 0));
        assert_eq!(extract_site(&query), FALLBACK_SITE);
    }
}
