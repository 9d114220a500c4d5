//! robots.txt engine: parsing, user-agent group selection, and
//! longest-match path rules with `*` and `$` wildcards.
//!
//! Group selection follows the Google semantics: all groups whose agents
//! match the crawler are collected, specific groups (exact or patterned
//! agent tokens) shadow the `*` group entirely, and the rules of the chosen
//! groups are merged before the longest-match Allow/Disallow decision.

use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use crate::fetcher::Fetcher;
use crate::url_utils;

/// One Allow/Disallow pattern, compiled once at group load.
#[derive(Debug, Clone)]
pub struct RulePattern {
    raw: String,
    regex: Option<Regex>,
    match_len: usize,
}

impl RulePattern {
    pub fn new(raw: &str) -> Self {
        // `$` only anchors in final position; everywhere else it is literal.
        let anchored = raw.ends_with('$');
        let body = if anchored { &raw[..raw.len() - 1] } else { raw };

        let mut pattern = String::from("^");
        for c in body.chars() {
            if c == '*' {
                pattern.push_str(".*");
            } else {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
        }
        if anchored {
            pattern.push('$');
        }

        Self {
            raw: raw.to_string(),
            regex: Regex::new(&pattern).ok(),
            match_len: body.len(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.raw.is_empty() {
            return path.is_empty();
        }
        match &self.regex {
            Some(re) => re.is_match(path),
            None => path.starts_with(&self.raw),
        }
    }

    /// Literal length used by the longest-match rule (`$` excluded).
    pub fn match_len(&self) -> usize {
        self.match_len
    }
}

/// A `User-agent` block and its rules, up to the next `User-agent` line.
/// Consecutive `User-agent` lines merge their agents into one group.
#[derive(Debug, Clone, Default)]
pub struct RuleGroup {
    pub agents: Vec<String>,
    pub disallows: Vec<RulePattern>,
    pub allows: Vec<RulePattern>,
    pub crawl_delay: Option<f64>,
}

/// Agent-token precedence: `*` = 1, patterned token = 2, bare token = 3.
pub fn agent_specificity(agent: &str) -> u8 {
    if agent == "*" {
        1
    } else if agent.contains('*') || agent.contains('/') {
        2
    } else {
        3
    }
}

/// Strip a `/version` suffix and trailing `*` from an agent token.
/// `Googlebot/2.1` and `Googlebot*` both normalize to `Googlebot`.
pub fn normalize_agent(agent: &str) -> &str {
    if agent == "*" {
        return agent;
    }
    match agent.find(|c| c == '/' || c == '*') {
        Some(pos) => &agent[..pos],
        None => agent,
    }
}

/// Whether a rule agent token applies to the crawler's user agent.
pub fn agent_matches(rule_agent: &str, crawler_agent: &str) -> bool {
    if rule_agent == "*" {
        return true;
    }
    normalize_agent(rule_agent).eq_ignore_ascii_case(normalize_agent(crawler_agent))
}

/// Parsed robots.txt for one host.
#[derive(Debug, Clone, Default)]
pub struct HostRules {
    pub groups: Vec<RuleGroup>,
    pub sitemaps: Vec<String>,
}

impl HostRules {
    /// Empty rules: everything allowed.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt content line by line. Directive names are matched
    /// case-insensitively; paths stay case-sensitive.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut sitemaps = Vec::new();
        let mut current: Option<RuleGroup> = None;
        let mut rule_seen_since_agent = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, value) = match line.split_once(':') {
                Some((d, v)) => (d.trim().to_ascii_lowercase(), v.trim()),
                None => continue,
            };

            match directive.as_str() {
                "user-agent" => {
                    if rule_seen_since_agent {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                    }
                    rule_seen_since_agent = false;
                    current
                        .get_or_insert_with(RuleGroup::default)
                        .agents
                        .push(value.to_string());
                }
                "disallow" => {
                    if let Some(group) = current.as_mut() {
                        rule_seen_since_agent = true;
                        if !value.is_empty() {
                            group.disallows.push(RulePattern::new(value));
                        }
                    }
                }
                "allow" => {
                    if let Some(group) = current.as_mut() {
                        rule_seen_since_agent = true;
                        if !value.is_empty() {
                            group.allows.push(RulePattern::new(value));
                        }
                    }
                }
                "crawl-delay" => {
                    if let Some(group) = current.as_mut() {
                        rule_seen_since_agent = true;
                        if let Ok(delay) = value.parse::<f64>() {
                            group.crawl_delay = Some(delay);
                        }
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups, sitemaps }
    }

    /// Groups that apply to the crawler: specific groups when any exist,
    /// otherwise the wildcard groups.
    fn matching_groups(&self, crawler_agent: &str) -> Vec<&RuleGroup> {
        let mut specific = Vec::new();
        let mut wildcard = Vec::new();

        for group in &self.groups {
            let best = group
                .agents
                .iter()
                .filter(|agent| agent_matches(agent, crawler_agent))
                .map(|agent| agent_specificity(agent))
                .max();
            match best {
                Some(spec) if spec >= 2 => specific.push(group),
                Some(_) => wildcard.push(group),
                None => {}
            }
        }

        if specific.is_empty() {
            wildcard
        } else {
            specific
        }
    }

    /// Longest-match Allow/Disallow decision for a path. Pure in
    /// `(rules, path, crawler_agent)`.
    pub fn allowed(&self, path: &str, crawler_agent: &str) -> bool {
        let chosen = self.matching_groups(crawler_agent);
        if chosen.is_empty() {
            return true;
        }

        let mut best_allow: Option<usize> = None;
        let mut best_disallow: Option<usize> = None;

        for group in &chosen {
            for pattern in &group.allows {
                if pattern.matches(path) {
                    let len = pattern.match_len();
                    if best_allow.map_or(true, |best| len > best) {
                        best_allow = Some(len);
                    }
                }
            }
            for pattern in &group.disallows {
                if pattern.matches(path) {
                    let len = pattern.match_len();
                    if best_disallow.map_or(true, |best| len > best) {
                        best_disallow = Some(len);
                    }
                }
            }
        }

        match (best_allow, best_disallow) {
            (None, None) => true,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            // Longer pattern wins; allow wins ties.
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    /// Crawl-delay for the crawler, preferring specific groups.
    pub fn crawl_delay(&self, crawler_agent: &str) -> Option<Duration> {
        self.matching_groups(crawler_agent)
            .iter()
            .find_map(|group| group.crawl_delay)
            .filter(|delay| delay.is_finite() && *delay >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Per-host robots policy cache. Entries live for the run.
pub struct RobotsCache {
    hosts: DashMap<String, Arc<HostRules>>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(user_agent: String) -> Self {
        Self {
            hosts: DashMap::new(),
            user_agent,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn host_key(url: &str) -> Option<String> {
        let parsed = url_utils::parse(url)?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Get the rules for a URL's host, fetching robots.txt on first use.
    /// The boolean is true when this call loaded the host for the first
    /// time (so callers can account sitemaps once per host).
    ///
    /// The robots.txt fetch goes through the regular fetcher but is exempt
    /// from robots policy itself. 404 means allow-all; any other failure
    /// logs a warning and allows all.
    pub async fn host_rules(&self, url: &str, fetcher: &Fetcher) -> (Arc<HostRules>, bool) {
        let key = match Self::host_key(url) {
            Some(key) => key,
            None => return (Arc::new(HostRules::allow_all()), false),
        };

        if let Some(cached) = self.hosts.get(&key) {
            return (Arc::clone(&cached), false);
        }

        let rules = match url_utils::robots_url(url) {
            Some(robots_url) => {
                let (result, _duration) = fetcher.fetch(&robots_url).await;
                match result {
                    Ok(response) if response.status == 200 => {
                        HostRules::parse(&response.body_string())
                    }
                    Ok(response) if response.status == 404 => HostRules::allow_all(),
                    Ok(response) => {
                        tracing::warn!(
                            "Failed to fetch robots.txt for {} [{}]",
                            key,
                            response.status
                        );
                        HostRules::allow_all()
                    }
                    Err(error) => {
                        tracing::warn!("Failed to fetch robots.txt for {}: {}", key, error);
                        HostRules::allow_all()
                    }
                }
            }
            None => HostRules::allow_all(),
        };

        let rules = Arc::new(rules);
        self.hosts.insert(key, Arc::clone(&rules));
        (rules, true)
    }

    /// Decision for a full URL against already-loaded host rules.
    pub fn allowed(&self, rules: &HostRules, url: &str) -> bool {
        rules.allowed(&url_utils::path_and_query(url), &self.user_agent)
    }

    pub fn cached_hosts(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_normalization() {
        assert_eq!(normalize_agent("Googlebot/2.1"), "Googlebot");
        assert_eq!(normalize_agent("Googlebot*"), "Googlebot");
        assert_eq!(normalize_agent("*"), "*");
        assert_eq!(normalize_agent("DatasetCrawler"), "DatasetCrawler");
    }

    #[test]
    fn test_agent_matching() {
        assert!(agent_matches("*", "AnyBot/1.0"));
        assert!(agent_matches("googlebot", "Googlebot/2.1"));
        assert!(agent_matches("Googlebot*", "googlebot"));
        assert!(!agent_matches("Bingbot", "Googlebot/2.1"));
    }

    #[test]
    fn test_specificity() {
        assert_eq!(agent_specificity("*"), 1);
        assert_eq!(agent_specificity("Google*"), 2);
        assert_eq!(agent_specificity("Googlebot/2.1"), 2);
        assert_eq!(agent_specificity("Googlebot"), 3);
    }

    #[test]
    fn test_parse_groups_and_merging() {
        let rules = HostRules::parse(
            "User-agent: BotA\nUser-agent: BotB\nDisallow: /a\n\nUser-agent: *\nDisallow: /b\n",
        );
        assert_eq!(rules.groups.len(), 2);
        assert_eq!(rules.groups[0].agents, vec!["BotA", "BotB"]);
        assert_eq!(rules.groups[0].disallows.len(), 1);
        assert_eq!(rules.groups[1].agents, vec!["*"]);
    }

    #[test]
    fn test_empty_disallow_ignored() {
        let rules = HostRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.allowed("/anything", "TestBot"));
    }

    #[test]
    fn test_simple_disallow() {
        let rules = HostRules::parse("User-agent: *\nDisallow: /private");
        assert!(!rules.allowed("/private", "TestBot"));
        assert!(!rules.allowed("/private/page", "TestBot"));
        assert!(rules.allowed("/public", "TestBot"));
        assert!(rules.allowed("/", "TestBot"));
    }

    #[test]
    fn test_wildcard_and_end_anchor() {
        let rules = HostRules::parse("User-agent: *\nDisallow: /*.php$\nAllow: /");
        assert!(!rules.allowed("/index.php", "TestBot"));
        assert!(rules.allowed("/index.php.bak", "TestBot"));
        assert!(rules.allowed("/about", "TestBot"));
    }

    #[test]
    fn test_wildcard_mid_pattern() {
        let rules = HostRules::parse("User-agent: *\nDisallow: /files/*/secret");
        assert!(!rules.allowed("/files/a/secret", "TestBot"));
        assert!(!rules.allowed("/files/a/b/secret", "TestBot"));
        assert!(rules.allowed("/files/a/open", "TestBot"));
    }

    #[test]
    fn test_longest_match_wins() {
        let rules =
            HostRules::parse("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(!rules.allowed("/private/secret", "TestBot"));
        assert!(rules.allowed("/private/public/page", "TestBot"));
    }

    #[test]
    fn test_tie_allows() {
        // Equal literal lengths: allow is least restrictive and wins.
        let rules = HostRules::parse("User-agent: *\nDisallow: /dir\nAllow: /dir");
        assert!(rules.allowed("/dir/page", "TestBot"));
    }

    #[test]
    fn test_end_anchor_excluded_from_length() {
        // "/ab$" counts as length 3, equal to "/ab": the tie goes to allow.
        // If the anchor counted, disallow would win at length 4.
        let rules = HostRules::parse("User-agent: *\nDisallow: /ab$\nAllow: /ab");
        assert!(rules.allowed("/ab", "TestBot"));
    }

    #[test]
    fn test_specific_group_shadows_wildcard() {
        let rules = HostRules::parse(
            "User-agent: Googlebot\nDisallow: /x\n\nUser-agent: *\nDisallow: /\n",
        );
        // A versioned agent matches the bare token group.
        assert!(!rules.allowed("/x", "Googlebot/2.1"));
        assert!(rules.allowed("/y", "Googlebot/2.1"));
        // Other crawlers fall back to the wildcard group.
        assert!(!rules.allowed("/y", "OtherBot/1.0"));
    }

    #[test]
    fn test_no_matching_group_allows() {
        let rules = HostRules::parse("User-agent: Bingbot\nDisallow: /");
        assert!(rules.allowed("/anything", "DatasetCrawler/1.0"));
    }

    #[test]
    fn test_crawl_delay_prefers_specific_group() {
        let rules = HostRules::parse(
            "User-agent: TestBot\nCrawl-delay: 5\nDisallow: /x\n\nUser-agent: *\nCrawl-delay: 10\nDisallow: /y\n",
        );
        assert_eq!(
            rules.crawl_delay("TestBot/1.0"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            rules.crawl_delay("OtherBot"),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_sitemaps_collected() {
        let rules = HostRules::parse(
            "Sitemap: https://a.test/sitemap.xml\nUser-agent: *\nDisallow: /x\nSitemap: https://a.test/news.xml\n",
        );
        assert_eq!(
            rules.sitemaps,
            vec![
                "https://a.test/sitemap.xml".to_string(),
                "https://a.test/news.xml".to_string()
            ]
        );
    }

    #[test]
    fn test_decision_deterministic() {
        let content = "User-agent: *\nDisallow: /a/*\nAllow: /a/b\n";
        let rules = HostRules::parse(content);
        let first = rules.allowed("/a/b/c", "TestBot");
        for _ in 0..10 {
            assert_eq!(rules.allowed("/a/b/c", "TestBot"), first);
        }
    }

    #[test]
    fn test_regex_metacharacters_escaped() {
        let rules = HostRules::parse("User-agent: *\nDisallow: /a+b(c)");
        assert!(!rules.allowed("/a+b(c)", "TestBot"));
        assert!(rules.allowed("/aab", "TestBot"));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let rules = HostRules::parse(
            "# a comment\n\nUser-agent: *\n# another\nDisallow: /x\n",
        );
        assert!(!rules.allowed("/x", "TestBot"));
    }
}
