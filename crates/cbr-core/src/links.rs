//! Content links inside rich text
//!
//! On backup, absolute links to course content (`<wwwroot>/mod/page/view.php?id=7`)
//! are replaced by site-independent tokens (`$@PAGEVIEWBYID*7@$`). On restore
//! the tokens are decoded through the id map into links to the new site.

use crate::ids::itemtype;
use cbr_element::{TransformError, TransformInput, TransformOutcome, ValueTransform};
use regex::{Captures, Regex};
use std::sync::Arc;

/// One link shape and the item type its id belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRule {
    /// Token name, upper case
    pub token: String,
    /// Path below the site root, e.g. `/course/view.php`
    pub path: String,
    /// Query parameter carrying the id
    pub param: String,
    /// Id-map item type of the id
    pub itemtype: String,
}

impl LinkRule {
    /// Rule for `<wwwroot><path>?<param>=<id>`
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        path: impl Into<String>,
        param: impl Into<String>,
        itemtype: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            path: path.into(),
            param: param.into(),
            itemtype: itemtype.into(),
        }
    }

    /// Course and section links
    #[must_use]
    pub fn core() -> Vec<Self> {
        vec![
            Self::new("COURSEVIEWBYID", "/course/view.php", "id", itemtype::COURSE),
            Self::new("SECTIONVIEWBYID", "/course/section.php", "id", itemtype::SECTION),
        ]
    }

    /// `/mod/<modname>/view.php?id=<cmid>`
    #[must_use]
    pub fn activity_view(modname: &str) -> Self {
        Self::new(
            format!("{}VIEWBYID", modname.to_uppercase()),
            format!("/mod/{modname}/view.php"),
            "id",
            itemtype::ACTIVITY,
        )
    }

    fn url(&self, wwwroot: &str, id: &str) -> String {
        format!("{wwwroot}{}?{}={id}", self.path, self.param)
    }
}

/// Text after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    /// Rewritten text
    pub text: String,
    /// Tokens that could not be mapped, as found
    pub unresolved: Vec<String>,
}

/// Encodes and decodes links for one site
#[derive(Debug)]
pub struct LinkCodec {
    wwwroot: String,
    rules: Vec<(LinkRule, Regex)>,
    token: Regex,
}

impl LinkCodec {
    /// Codec for links rooted at `wwwroot`
    ///
    /// # Errors
    /// A rule does not compile to a pattern
    pub fn new(wwwroot: &str, rules: Vec<LinkRule>) -> Result<Self, regex::Error> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                let pattern = format!(
                    r"{}{}\?{}=([0-9]+)",
                    regex::escape(wwwroot),
                    regex::escape(&rule.path),
                    regex::escape(&rule.param)
                );
                Regex::new(&pattern).map(|re| (rule, re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            wwwroot: wwwroot.to_string(),
            rules: compiled,
            token: Regex::new(r"\$@([A-Z0-9_]+)\*([0-9]+)@\$")?,
        })
    }

    /// Site root links are made against
    #[must_use]
    pub fn wwwroot(&self) -> &str {
        &self.wwwroot
    }

    /// Replace links to this site by tokens
    #[must_use]
    pub fn encode(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (rule, pattern) in &self.rules {
            if pattern.is_match(&out) {
                out = pattern
                    .replace_all(&out, |caps: &Captures<'_>| format!("$@{}*{}@$", rule.token, &caps[1]))
                    .into_owned();
            }
        }
        out
    }

    /// Whether `text` holds any token
    #[must_use]
    pub fn has_tokens(&self, text: &str) -> bool {
        self.token.is_match(text)
    }

    /// Replace tokens by links to this site
    ///
    /// `resolve` maps an old id to its new id. Tokens it cannot map point
    /// back at `source_wwwroot`; unknown tokens are left as they are. Both
    /// end up in [`DecodedText::unresolved`].
    pub fn decode<F>(&self, text: &str, source_wwwroot: &str, mut resolve: F) -> DecodedText
    where
        F: FnMut(&LinkRule, i64) -> Option<i64>,
    {
        let mut unresolved = Vec::new();
        let decoded = self.token.replace_all(text, |caps: &Captures<'_>| {
            let whole = caps[0].to_string();
            let Some((rule, _)) = self.rules.iter().find(|(r, _)| r.token == caps[1]) else {
                unresolved.push(whole.clone());
                return whole;
            };
            let mapped = caps[2].parse::<i64>().ok().and_then(|old| resolve(rule, old));
            match mapped {
                Some(new) => rule.url(&self.wwwroot, &new.to_string()),
                None => {
                    unresolved.push(whole);
                    rule.url(source_wwwroot, &caps[2])
                }
            }
        });
        DecodedText {
            text: decoded.into_owned(),
            unresolved,
        }
    }
}

/// Encodes links of a rich-text field while its value is stored
#[derive(Debug, Clone)]
pub struct LinkEncodeTransform {
    codec: Arc<LinkCodec>,
}

impl LinkEncodeTransform {
    /// Transform backed by `codec`
    #[inline]
    #[must_use]
    pub fn new(codec: Arc<LinkCodec>) -> Self {
        Self { codec }
    }
}

impl ValueTransform for LinkEncodeTransform {
    fn apply(&self, input: &TransformInput<'_>) -> Result<TransformOutcome, TransformError> {
        Ok(TransformOutcome::Store(input.raw.map(|text| self.codec.encode(text))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbr_element::ProcessContext;

    fn codec(root: &str) -> LinkCodec {
        let mut rules = LinkRule::core();
        rules.push(LinkRule::activity_view("page"));
        LinkCodec::new(root, rules).unwrap()
    }

    #[test]
    fn encodes_known_links_only() {
        let c = codec("http://old.example");
        let text = r#"<a href="http://old.example/mod/page/view.php?id=7">p</a> <a href="http://other.example/course/view.php?id=2">x</a> http://old.example/course/view.php?id=2"#;
        assert_eq!(
            c.encode(text),
            r#"<a href="$@PAGEVIEWBYID*7@$">p</a> <a href="http://other.example/course/view.php?id=2">x</a> $@COURSEVIEWBYID*2@$"#
        );
    }

    #[test]
    fn decodes_through_resolver() {
        let c = codec("http://new.example");
        let out = c.decode("see $@PAGEVIEWBYID*7@$ and $@PAGEVIEWBYID*8@$", "http://old.example", |rule, old| {
            assert_eq!(rule.itemtype, itemtype::ACTIVITY);
            (old == 7).then_some(70)
        });
        assert_eq!(
            out.text,
            "see http://new.example/mod/page/view.php?id=70 and http://old.example/mod/page/view.php?id=8"
        );
        assert_eq!(out.unresolved, ["$@PAGEVIEWBYID*8@$"]);
    }

    #[test]
    fn unknown_token_left_alone() {
        let c = codec("http://new.example");
        let out = c.decode("$@QUIZVIEWBYID*3@$", "http://old.example", |_, _| Some(1));
        assert_eq!(out.text, "$@QUIZVIEWBYID*3@$");
        assert_eq!(out.unresolved.len(), 1);
        assert!(c.has_tokens(&out.text));
    }

    #[test]
    fn transform_encodes_and_keeps_null() {
        let t = LinkEncodeTransform::new(Arc::new(codec("http://old.example")));
        let ctx = ProcessContext::detached();
        let input = |raw| TransformInput {
            parent: "course",
            field: "summary",
            raw,
            record: None,
            ctx: &ctx,
        };
        assert_eq!(
            t.apply(&input(Some("http://old.example/course/section.php?id=4"))).unwrap(),
            TransformOutcome::Store(Some("$@SECTIONVIEWBYID*4@$".to_string()))
        );
        assert_eq!(t.apply(&input(None)).unwrap(), TransformOutcome::Store(None));
    }
}
