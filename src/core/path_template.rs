//! Route templates with fixed, named and catch-all segments.
//!
//! Templates use the `:name` / `*name` syntax found in the JSON config. A
//! template can be rendered into the dispatch table's `{name}` / `{*name}`
//! syntax with [`PathTemplate::route_pattern`], checked against another
//! template for variable compatibility, and used to rebuild a concrete path
//! from the parameters captured on an incoming request.
use std::fmt;

/// Kind of a single template segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Literal text, matched verbatim.
    Fixed,
    /// Captures exactly one path component (`:name`).
    Named,
    /// Captures the remainder of the path (`*name`).
    CatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Literal text for fixed segments, variable name otherwise.
    pub value: String,
}

impl Segment {
    fn fixed(value: &str) -> Self {
        Self {
            kind: SegmentKind::Fixed,
            value: value.to_string(),
        }
    }

    pub fn is_variable(&self) -> bool {
        self.kind != SegmentKind::Fixed
    }
}

/// Parameters captured from a request path, in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Value captured under `name`, or the empty string when absent.
    pub fn by_name(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'k, 'v> From<matchit::Params<'k, 'v>> for PathParams {
    fn from(params: matchit::Params<'k, 'v>) -> Self {
        let mut out = PathParams::new();
        for (name, value) in params.iter() {
            out.insert(name, value);
        }
        out
    }
}

/// A parsed route template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template string. Splitting on `/` means a leading slash yields
    /// an empty fixed first segment. `:` and `*` are only special as the
    /// first character of a segment; there is no escaping.
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .map(|raw| match raw.as_bytes().first() {
                Some(b':') => Segment {
                    kind: SegmentKind::Named,
                    value: raw[1..].to_string(),
                },
                Some(b'*') => Segment {
                    kind: SegmentKind::CatchAll,
                    value: raw[1..].to_string(),
                },
                _ => Segment::fixed(raw),
            })
            .collect();

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Iterate over the named and catch-all segments.
    pub fn variables(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_variable())
    }

    pub fn has_variables(&self) -> bool {
        self.variables().next().is_some()
    }

    /// Whether `self` (a mount path) and `target` capture exactly the same
    /// variables. Every variable of either side must appear on the other side
    /// with the same kind and name.
    pub fn is_proxy_compatible(&self, target: &PathTemplate) -> bool {
        let covers = |from: &PathTemplate, into: &PathTemplate| {
            from.variables().all(|var| {
                into.variables()
                    .any(|other| other.kind == var.kind && other.value == var.value)
            })
        };

        covers(target, self) && covers(self, target)
    }

    /// Rebuild a concrete path, substituting captured values for variables.
    ///
    /// Catch-all captures may carry their leading separator; it is stripped
    /// so that the segment join does not double it.
    pub fn construct_path(&self, params: &PathParams) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            match segment.kind {
                SegmentKind::Fixed => out.push_str(&segment.value),
                SegmentKind::Named => out.push_str(params.by_name(&segment.value)),
                SegmentKind::CatchAll => {
                    let value = params.by_name(&segment.value);
                    out.push_str(value.strip_prefix('/').unwrap_or(value));
                }
            }
        }
        out
    }

    /// Match a concrete path against this template and return the captured
    /// variables. Catch-all captures are returned without a leading `/`, the
    /// same shape the dispatch table produces.
    pub fn capture(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = path.split('/');

        for (i, segment) in self.segments.iter().enumerate() {
            match segment.kind {
                SegmentKind::Fixed => {
                    if parts.next()? != segment.value {
                        return None;
                    }
                }
                SegmentKind::Named => {
                    let part = parts.next()?;
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(&segment.value, part);
                }
                SegmentKind::CatchAll => {
                    if i + 1 != self.segments.len() {
                        return None;
                    }
                    let rest: Vec<&str> = parts.by_ref().collect();
                    if rest.is_empty() || rest.concat().is_empty() {
                        return None;
                    }
                    params.insert(&segment.value, rest.join("/"));
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// Render in the dispatch table's syntax (`{name}`, `{*name}`), escaping
    /// literal braces.
    pub fn route_pattern(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment.kind {
                SegmentKind::Fixed => segment.value.replace('{', "{{").replace('}', "}}"),
                SegmentKind::Named => format!("{{{}}}", segment.value),
                SegmentKind::CatchAll => format!("{{*{}}}", segment.value),
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match segment.kind {
                SegmentKind::Fixed => f.write_str(&segment.value)?,
                SegmentKind::Named => write!(f, ":{}", segment.value)?,
                SegmentKind::CatchAll => write!(f, "*{}", segment.value)?,
            }
        }
        Ok(())
    }
}

impl From<&str> for PathTemplate {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        let mut p = PathParams::new();
        for (k, v) in pairs {
            p.insert(*k, *v);
        }
        p
    }

    #[test]
    fn test_parse_segment_kinds() {
        let template = PathTemplate::parse("/users/:id/files/*rest");
        let kinds: Vec<SegmentKind> = template.segments().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Fixed,
                SegmentKind::Fixed,
                SegmentKind::Named,
                SegmentKind::Fixed,
                SegmentKind::CatchAll,
            ]
        );
        assert_eq!(template.segments()[0].value, "");
        assert_eq!(template.segments()[2].value, "id");
        assert_eq!(template.segments()[4].value, "rest");
    }

    #[test]
    fn test_display_matches_source() {
        for src in ["/a/:b/*c", "/", "", "/x/y", "relative/:v"] {
            assert_eq!(PathTemplate::parse(src).to_string(), src);
        }
    }

    #[test]
    fn test_compatible_with_reordered_variables_and_different_fixed_segments() {
        let mount = PathTemplate::parse("/api/:user/:repo/*rest");
        let target = PathTemplate::parse("/v2/repos/:repo/by/:user/tree/*rest");
        assert!(mount.is_proxy_compatible(&target));
        assert!(target.is_proxy_compatible(&mount));
    }

    #[test]
    fn test_incompatible_when_target_uses_uncaptured_variable() {
        let mount = PathTemplate::parse("/echo/:name");
        assert!(!mount.is_proxy_compatible(&PathTemplate::parse("/hello/:other")));
        assert!(!mount.is_proxy_compatible(&PathTemplate::parse("/hello/:name/:extra")));
    }

    #[test]
    fn test_incompatible_when_mount_captures_unused_variable() {
        let mount = PathTemplate::parse("/echo/:name/:id");
        assert!(!mount.is_proxy_compatible(&PathTemplate::parse("/hello/:name")));
    }

    #[test]
    fn test_incompatible_when_kind_differs() {
        let mount = PathTemplate::parse("/files/*path");
        assert!(!mount.is_proxy_compatible(&PathTemplate::parse("/blob/:path")));
    }

    #[test]
    fn test_fixed_only_templates_are_compatible() {
        let mount = PathTemplate::parse("/old/location");
        assert!(mount.is_proxy_compatible(&PathTemplate::parse("/new")));
    }

    #[test]
    fn test_construct_path_named() {
        let template = PathTemplate::parse("/hello/:name/greeting");
        assert_eq!(
            template.construct_path(&params(&[("name", "bob")])),
            "/hello/bob/greeting"
        );
    }

    #[test]
    fn test_construct_path_catch_all_strips_leading_separator() {
        let template = PathTemplate::parse("/v1/*rest");
        assert_eq!(
            template.construct_path(&params(&[("rest", "/a/b.txt")])),
            "/v1/a/b.txt"
        );
        assert_eq!(
            template.construct_path(&params(&[("rest", "a/b.txt")])),
            "/v1/a/b.txt"
        );
    }

    #[test]
    fn test_capture_round_trip_fixed_and_named() {
        let cases = [
            ("/users/:id", "/users/42"),
            ("/:org/:repo/issues/:n", "/rust-lang/rust/issues/1"),
            ("/static/path", "/static/path"),
            ("/a/:x/b/:y/c", "/a/1/b/2/c"),
        ];
        for (template, path) in cases {
            let template = PathTemplate::parse(template);
            let captured = template.capture(path).expect("path should match");
            assert_eq!(template.construct_path(&captured), path);
        }
    }

    #[test]
    fn test_capture_rejects_mismatches() {
        let template = PathTemplate::parse("/users/:id");
        assert!(template.capture("/users").is_none());
        assert!(template.capture("/users/").is_none());
        assert!(template.capture("/users/1/extra").is_none());
        assert!(template.capture("/people/1").is_none());
    }

    #[test]
    fn test_capture_catch_all() {
        let template = PathTemplate::parse("/files/*path");
        let captured = template.capture("/files/img/a.png").unwrap();
        assert_eq!(captured.by_name("path"), "img/a.png");
        assert!(template.capture("/files").is_none());
        assert!(template.capture("/files/").is_none());
    }

    #[test]
    fn test_route_pattern_rendering() {
        assert_eq!(
            PathTemplate::parse("/a/:b/*c").route_pattern(),
            "/a/{b}/{*c}"
        );
        assert_eq!(PathTemplate::parse("/{x}").route_pattern(), "/{{x}}");
    }

    #[test]
    fn test_route_pattern_matches_like_capture() {
        let template = PathTemplate::parse("/repo/:name/*rest");
        let mut router = matchit::Router::new();
        router.insert(template.route_pattern(), ()).unwrap();

        let matched = router.at("/repo/canopy/src/lib.rs").unwrap();
        let from_router = PathParams::from(matched.params);
        let from_capture = template.capture("/repo/canopy/src/lib.rs").unwrap();
        assert_eq!(from_router, from_capture);
    }
}
