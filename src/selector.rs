//! Selector expressions.
//!
//! Sites are registered with a selector that points at the element holding
//! the price. Two syntaxes are accepted:
//!
//! - **XPath location paths** (anything starting with `/` or `./`), the
//!   format site lists are usually written in. A practical subset is
//!   compiled to an equivalent CSS selector.
//! - **CSS selectors**, passed straight to [`scraper::Selector`].
//!
//! # Supported XPath
//!
//! | XPath | CSS |
//! |-------|-----|
//! | `//p` | `p` |
//! | `/html/body/p` | `html:root > body > p` |
//! | `./p`, `.//p` | `:root > p`, `:root p` |
//! | `//div//span` | `div span` |
//! | `//*` | `*` |
//! | `[@class='x']` | `[class="x"]` |
//! | `//*[@data-price]` | `*[data-price]` |
//! | `[contains(@class,'x')]` | `[class*="x"]` |
//! | `[starts-with(@id,'x')]` | `[id^="x"]` |
//! | `[2]` | `:nth-of-type(2)` (`:nth-child(2)` on `*`) |
//! | `[last()]` | `:last-of-type` (`:last-child` on `*`) |
//! | `[@a='x' and @b]` | `[a="x"][b]` |
//!
//! Relative paths are evaluated from the document element. A position is
//! only accepted as the first predicate of a step: `//li[2][@class='x']`
//! compiles, but `//li[@class='x'][2]` counts among the filtered nodes,
//! which CSS cannot express, and is rejected.
//!
//! A trailing `/text()` step is accepted and ignored: the price text is
//! always read from the matched element. Other axes, functions, and
//! operators are rejected as invalid.

use scraper::Selector;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unsupported xpath {expr:?} at offset {offset}: {reason}")]
    Xpath {
        expr: String,
        offset: usize,
        reason: String,
    },
    #[error("{0}")]
    Css(String),
}

/// A selector expression ready to be evaluated against a document.
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    css: String,
    selector: Selector,
}

impl CompiledSelector {
    /// The CSS form of the expression.
    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// Returns true when `expr` is written as an XPath location path.
pub fn is_xpath(expr: &str) -> bool {
    let expr = expr.trim_start();
    expr.starts_with('/') || expr.starts_with("./")
}

/// Compile a selector expression (XPath subset or CSS).
pub fn compile(expr: &str) -> Result<CompiledSelector, SelectorError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(SelectorError::Empty);
    }

    let css = if is_xpath(expr) {
        xpath_to_css(expr)?
    } else {
        expr.to_string()
    };

    let selector = Selector::parse(&css).map_err(|e| SelectorError::Css(e.to_string()))?;
    Ok(CompiledSelector { css, selector })
}

/// Translate an XPath location path into CSS.
pub fn xpath_to_css(expr: &str) -> Result<String, SelectorError> {
    XpathParser::new(expr.trim()).parse()
}

struct XpathParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> XpathParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::Xpath {
            expr: self.src.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn name(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 || !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn literal(&mut self) -> Result<String, SelectorError> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected quoted string")),
        };
        self.pos += 1;
        let rest = self.rest();
        let end = rest
            .find(quote)
            .ok_or_else(|| self.error("unterminated string"))?;
        let value = rest[..end].to_string();
        self.pos += end + 1;
        Ok(value)
    }

    fn number(&mut self) -> Option<u32> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        let n = rest[..len].parse().ok()?;
        self.pos += len;
        Some(n)
    }

    fn parse(mut self) -> Result<String, SelectorError> {
        let mut css = String::new();
        let mut absolute = false;
        if self.eat(".//") {
            css.push_str(":root ");
        } else if self.eat("./") {
            css.push_str(":root > ");
        } else if !self.eat("//") {
            if !self.eat("/") {
                return Err(self.error("expected '/' or '//'"));
            }
            absolute = true;
        }

        loop {
            if self.rest().starts_with("text()") {
                return Err(self.error("selector must target an element"));
            }
            css.push_str(&self.step()?);
            if std::mem::take(&mut absolute) {
                css.push_str(":root");
            }

            if self.at_end() {
                break;
            }
            let rest = self.rest();
            if rest.starts_with('/') && rest.trim_start_matches('/') == "text()" {
                break;
            }
            if self.eat("//") {
                css.push(' ');
            } else if self.eat("/") {
                css.push_str(" > ");
            } else {
                return Err(self.error("unexpected character"));
            }
        }
        Ok(css)
    }

    fn step(&mut self) -> Result<String, SelectorError> {
        let tag = if self.eat("*") {
            "*"
        } else {
            self.name().ok_or_else(|| self.error("expected element name"))?
        };

        let mut step = tag.to_string();
        let mut terms = 0;
        while self.eat("[") {
            self.predicate(tag, &mut step, &mut terms)?;
            self.skip_ws();
            if !self.eat("]") {
                return Err(self.error("expected ']'"));
            }
        }
        Ok(step)
    }

    fn predicate(
        &mut self,
        tag: &str,
        out: &mut String,
        terms: &mut usize,
    ) -> Result<(), SelectorError> {
        loop {
            self.skip_ws();
            self.term(tag, out, *terms == 0)?;
            *terms += 1;
            self.skip_ws();
            if !self.eat("and ") {
                return Ok(());
            }
        }
    }

    /// `first` is false once the step already has a predicate; positions
    /// are then relative to the filtered set and cannot be expressed.
    fn term(&mut self, tag: &str, out: &mut String, first: bool) -> Result<(), SelectorError> {
        if self.eat("@") {
            let attr = self
                .name()
                .ok_or_else(|| self.error("expected attribute name"))?;
            self.skip_ws();
            if self.eat("=") {
                self.skip_ws();
                let value = self.literal()?;
                out.push_str(&format!("[{}={}]", attr, css_string(&value)));
            } else {
                out.push_str(&format!("[{}]", attr));
            }
            return Ok(());
        }

        for (func, op) in [("contains(", "*="), ("starts-with(", "^=")] {
            if self.eat(func) {
                self.skip_ws();
                if !self.eat("@") {
                    return Err(self.error("only attribute arguments are supported"));
                }
                let attr = self
                    .name()
                    .ok_or_else(|| self.error("expected attribute name"))?;
                self.skip_ws();
                if !self.eat(",") {
                    return Err(self.error("expected ','"));
                }
                self.skip_ws();
                let value = self.literal()?;
                self.skip_ws();
                if !self.eat(")") {
                    return Err(self.error("expected ')'"));
                }
                out.push_str(&format!("[{}{}{}]", attr, op, css_string(&value)));
                return Ok(());
            }
        }

        let positional = self.rest().starts_with("last()")
            || self.rest().starts_with(|c: char| c.is_ascii_digit());
        if positional && !first {
            return Err(self.error("position after another predicate is not supported"));
        }

        if self.eat("last()") {
            out.push_str(if tag == "*" { ":last-child" } else { ":last-of-type" });
            return Ok(());
        }

        if let Some(n) = self.number() {
            if n == 0 {
                return Err(self.error("positions start at 1"));
            }
            let pseudo = if tag == "*" { "nth-child" } else { "nth-of-type" };
            out.push_str(&format!(":{}({})", pseudo, n));
            return Ok(());
        }

        Err(self.error("unsupported predicate"))
    }
}

fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_predicate() {
        assert_eq!(xpath_to_css("//p[@class='price']").unwrap(), "p[class=\"price\"]");
    }

    #[test]
    fn absolute_path_with_position() {
        assert_eq!(
            xpath_to_css("/html/body/div[2]/span").unwrap(),
            "html:root > body > div:nth-of-type(2) > span"
        );
        assert_eq!(xpath_to_css("/*[@lang]").unwrap(), "*[lang]:root");
    }

    #[test]
    fn descendant_steps_and_trailing_text() {
        assert_eq!(
            xpath_to_css("//div[@id=\"main\"]//span[contains(@class, 'amount')]/text()").unwrap(),
            "div[id=\"main\"] span[class*=\"amount\"]"
        );
    }

    #[test]
    fn wildcard_and_conjunction() {
        assert_eq!(xpath_to_css("//*[@data-price]").unwrap(), "*[data-price]");
        assert_eq!(
            xpath_to_css("//p[last()][@a='x' and @b]").unwrap(),
            "p:last-of-type[a=\"x\"][b]"
        );
        assert_eq!(xpath_to_css("//ul/*[1]").unwrap(), "ul > *:nth-child(1)");
    }

    #[test]
    fn starts_with_and_relative_path() {
        assert_eq!(
            xpath_to_css(".//span[starts-with(@id,'price-')]").unwrap(),
            ":root span[id^=\"price-\"]"
        );
        assert_eq!(xpath_to_css("./body/p").unwrap(), ":root > body > p");
    }

    #[test]
    fn position_must_be_the_first_predicate() {
        assert_eq!(
            xpath_to_css("//li[2][@class='price']").unwrap(),
            "li:nth-of-type(2)[class=\"price\"]"
        );
        for expr in [
            "//li[@class='price'][2]",
            "//div[@class='item'][1]",
            "//li[@class='price'][last()]",
            "//li[@a and 2]",
            "//li[1][2]",
        ] {
            let err = xpath_to_css(expr).unwrap_err();
            assert!(
                err.to_string().contains("position after another predicate"),
                "{}: {}",
                expr,
                err
            );
        }
    }

    #[test]
    fn absolute_path_only_matches_from_the_root() {
        let html = scraper::Html::parse_document(
            "<html><body><div><p>1</p></div><section><div><p>2</p></div></section></body></html>",
        );
        let compiled = compile("/html/body/div/p").unwrap();
        let texts: Vec<String> = html
            .select(compiled.selector())
            .map(|e| e.text().collect())
            .collect();
        assert_eq!(texts, vec!["1"]);
        assert_eq!(html.select(compile("/body").unwrap().selector()).count(), 0);
    }

    #[test]
    fn quotes_in_values_are_escaped() {
        assert_eq!(
            xpath_to_css("//p[@title='say \"hi\"']").unwrap(),
            "p[title=\"say \\\"hi\\\"\"]"
        );
    }

    #[test]
    fn unsupported_xpath_is_rejected() {
        for expr in [
            "//p[",
            "//p[@class=price]",
            "//text()",
            "//p/following-sibling::span",
            "//p[contains(text(),'x')]",
            "//p[0]",
            "p//",
        ] {
            assert!(xpath_to_css(expr).is_err(), "expected error for {}", expr);
        }
    }

    #[test]
    fn compile_accepts_css_and_xpath() {
        assert_eq!(compile("p.price").unwrap().css(), "p.price");
        assert_eq!(compile("  //b ").unwrap().css(), "b");
        assert!(is_xpath("./p"));
        assert!(!is_xpath("div > p"));
    }

    #[test]
    fn compile_rejects_empty_and_bad_css() {
        assert_eq!(compile("   ").unwrap_err(), SelectorError::Empty);
        assert!(matches!(compile("p[[").unwrap_err(), SelectorError::Css(_)));
    }
}
