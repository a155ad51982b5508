use scraper::{Html, Selector};
use std::collections::HashMap;

/// Everything the scout extracts from one rendered snapshot page.
#[derive(Debug, Clone, Default)]
pub struct PageAnalysis {
    /// The document title, trimmed, if present and non-empty
    pub title: Option<String>,

    /// The declared document language, from the root element's lang attribute
    pub language: Option<String>,

    /// Lowercased visible text words and how often each appears
    pub word_counts: HashMap<String, i64>,

    /// Lowercased element names and how often each appears
    pub tag_counts: HashMap<String, i64>,

    /// Raw href values of every anchor on the page
    pub links: Vec<String>,

    /// Concatenated visible text, lowercased, for sensitivity matching
    pub text: String,
}

impl PageAnalysis {
    /// Parses an HTML document and tallies its words, tags, and links.
    ///
    /// Words are visible-text runs of alphanumeric characters, lowercased.
    /// Script and style content is not visible text and is skipped.
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);

        let title = title_selector()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let language = Selector::parse("html[lang]")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .and_then(|el| el.value().attr("lang"))
            .map(|lang| lang.to_lowercase());

        let mut tag_counts = HashMap::new();
        if let Some(sel) = all_selector() {
            for element in document.select(&sel) {
                let name = element.value().name().to_lowercase();
                *tag_counts.entry(name).or_insert(0) += 1;
            }
        }

        let text = visible_text(&document);
        let mut word_counts = HashMap::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *word_counts.entry(word.to_string()).or_insert(0) += 1;
        }

        let links = link_selector()
            .map(|sel| {
                document
                    .select(&sel)
                    .filter_map(|el| el.value().attr("href"))
                    .map(|href| href.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title,
            language,
            word_counts,
            tag_counts,
            links,
            text,
        }
    }

    /// Whether the page embeds plugin-rendered media.
    pub fn uses_plugins(&self) -> bool {
        ["object", "embed", "applet"]
            .iter()
            .any(|tag| self.tag_counts.contains_key(*tag))
    }
}

fn title_selector() -> Option<Selector> {
    Selector::parse("title").ok()
}

fn link_selector() -> Option<Selector> {
    Selector::parse("a[href]").ok()
}

fn all_selector() -> Option<Selector> {
    Selector::parse("*").ok()
}

/// Collects the document's visible text, lowercased.
fn visible_text(document: &Html) -> String {
    let mut text = String::new();
    if let Some(sel) = all_selector() {
        for element in document.select(&sel) {
            let name = element.value().name();
            if name == "script" || name == "style" {
                continue;
            }
            for child in element.children() {
                if let Some(fragment) = child.value().as_text() {
                    text.push_str(fragment);
                    text.push(' ');
                }
            }
        }
    }
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
        <head><title> My Flash Page </title></head>
        <body bgcolor="black">
            <marquee>Welcome to my FLASH page!</marquee>
            <object data="game.swf"></object>
            <object data="intro.swf"></object>
            <p>flash games and more flash</p>
            <a href="games.html">Games</a>
            <a href="http://example.com/links.html">Links</a>
            <script>var flash = "not visible";</script>
        </body>
        </html>
    "#;

    #[test]
    fn test_title() {
        let page = PageAnalysis::from_html(SAMPLE);
        assert_eq!(page.title.as_deref(), Some("My Flash Page"));
    }

    #[test]
    fn test_missing_title_is_none() {
        let page = PageAnalysis::from_html("<html><body>hi</body></html>");
        assert_eq!(page.title, None);
    }

    #[test]
    fn test_tag_counts_per_occurrence() {
        let page = PageAnalysis::from_html(SAMPLE);
        assert_eq!(page.tag_counts.get("object"), Some(&2));
        assert_eq!(page.tag_counts.get("marquee"), Some(&1));
    }

    #[test]
    fn test_word_counts_are_lowercased() {
        let page = PageAnalysis::from_html(SAMPLE);
        // "Flash" in the title, "FLASH" in the marquee, and two in the
        // paragraph all tally under one key.
        assert_eq!(page.word_counts.get("flash"), Some(&4));
        assert_eq!(page.word_counts.get("FLASH"), None);
    }

    #[test]
    fn test_script_text_is_not_visible() {
        let page = PageAnalysis::from_html(SAMPLE);
        assert!(!page.word_counts.contains_key("visible"));
    }

    #[test]
    fn test_language_and_plugins() {
        let page = PageAnalysis::from_html(SAMPLE);
        assert!(page.uses_plugins());

        let plain =
            PageAnalysis::from_html(r#"<html lang="EN"><body><p>hello</p></body></html>"#);
        assert_eq!(plain.language.as_deref(), Some("en"));
        assert!(!plain.uses_plugins());
    }

    #[test]
    fn test_links() {
        let page = PageAnalysis::from_html(SAMPLE);
        assert_eq!(
            page.links,
            vec!["games.html", "http://example.com/links.html"]
        );
    }
}
