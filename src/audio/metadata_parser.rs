// Filename fallback for files without usable tags
// "01 - Artist - Title (Official Video).mp3" -> artist "Artist", title "Title"

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetadata {
    pub suggested_title: String,
    pub suggested_artist: Option<String>,
    pub confidence: f32, // 0.0 to 1.0
}

pub struct MetadataParser {
    track_number: Option<Regex>,
    noise: Option<Regex>,
    whitespace: Option<Regex>,
    delimiters: Vec<(&'static str, f32)>,
}

impl MetadataParser {
    pub fn new() -> Self {
        // Leading track number followed by a separator: "01 - ", "3. ", "12_"
        let track_number = Regex::new(r"^\d{1,3}\s*[-._)]\s*").ok();
        // Upload noise: "(Official Video)", "[Audio]", "(Lyrics)"
        let noise = Regex::new(
            r"(?i)\s*[\(\[](official[^\)\]]*|audio|video|lyrics?|lyric video|music video|hq|hd)[\)\]]",
        )
        .ok();
        let whitespace = Regex::new(r"\s{2,}").ok();

        Self {
            track_number,
            noise,
            whitespace,
            // Checked in order, most common first
            delimiters: vec![(" - ", 0.9), (" – ", 0.85), (" | ", 0.8), (" ~ ", 0.7)],
        }
    }

    /// Parse a file stem (no extension).
    pub fn parse_stem(&self, stem: &str) -> ParsedMetadata {
        let without_number = match &self.track_number {
            Some(regex) => regex.replace(stem.trim(), "").into_owned(),
            None => stem.trim().to_string(),
        };
        let cleaned = self.clean_text(&without_number);

        for &(delimiter, confidence) in &self.delimiters {
            let parts: Vec<String> = cleaned
                .split(delimiter)
                .map(|part| self.clean_text(part))
                .filter(|part| !part.is_empty())
                .collect();

            if parts.len() >= 2 {
                let artist = parts[0].clone();
                let title = parts[1..].join(delimiter);
                return ParsedMetadata {
                    suggested_title: title,
                    suggested_artist: Some(artist),
                    confidence,
                };
            }
        }

        let title = if cleaned.is_empty() {
            stem.trim().to_string()
        } else {
            cleaned
        };

        ParsedMetadata {
            suggested_title: title,
            suggested_artist: None,
            confidence: 0.3,
        }
    }

    pub fn clean_text(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        if let Some(regex) = &self.noise {
            cleaned = regex.replace_all(&cleaned, "").into_owned();
        }
        if let Some(regex) = &self.whitespace {
            cleaned = regex.replace_all(&cleaned, " ").into_owned();
        }
        cleaned
            .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .to_string()
    }
}

impl Default for MetadataParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_patterns() {
        let parser = MetadataParser::new();

        let result = parser.parse_stem("21 - blink-182 - TAKE ME IN (Official Lyric Video)");
        assert_eq!(result.suggested_title, "TAKE ME IN");
        assert_eq!(result.suggested_artist.as_deref(), Some("blink-182"));

        let result = parser.parse_stem("The Black Keys - Beautiful People (Stay High) (Official Video)");
        assert_eq!(result.suggested_title, "Beautiful People (Stay High)");
        assert_eq!(result.suggested_artist.as_deref(), Some("The Black Keys"));

        let result = parser.parse_stem("Portishead | Roads");
        assert_eq!(result.suggested_title, "Roads");
        assert_eq!(result.suggested_artist.as_deref(), Some("Portishead"));
    }

    #[test]
    fn test_artist_number_is_not_a_track_number() {
        let parser = MetadataParser::new();
        let result = parser.parse_stem("50 Cent - In Da Club");
        assert_eq!(result.suggested_artist.as_deref(), Some("50 Cent"));
        assert_eq!(result.suggested_title, "In Da Club");
    }

    #[test]
    fn test_plain_title() {
        let parser = MetadataParser::new();
        let result = parser.parse_stem("03. Teardrop  (Audio)");
        assert_eq!(result.suggested_title, "Teardrop");
        assert_eq!(result.suggested_artist, None);
    }

    #[test]
    fn test_text_cleaning() {
        let parser = MetadataParser::new();

        let cleaned = parser.clean_text("  TAKE ME IN  (Official Lyric Video)  ");
        assert_eq!(cleaned, "TAKE ME IN");
    }
}
