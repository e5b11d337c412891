//! Transcript to flashcard deck conversion.
//!
//! One card per non-blank transcript line, numbered from 1 in transcript
//! order. The deck is written as Anki's CSV import format: a `Front,Back`
//! header and one fully quoted row per card.

/// A retained transcript line: non-blank, in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine<'a> {
  pub number: usize,
  pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flashcard {
  pub front: String,
  pub back: String,
}

pub const CSV_HEADER: &str = "Front,Back";

/// Split on line boundaries and drop whitespace-only lines.
pub fn transcript_lines(transcript: &str) -> Vec<TranscriptLine<'_>> {
  transcript
    .lines()
    .filter(|line| !line.trim().is_empty())
    .enumerate()
    .map(|(i, text)| TranscriptLine { number: i + 1, text })
    .collect()
}

/// Double every quote character (CSV escaping).
pub fn escape_field(text: &str) -> String {
  text.replace('"', "\"\"")
}

impl From<&TranscriptLine<'_>> for Flashcard {
  fn from(line: &TranscriptLine<'_>) -> Self {
    Flashcard { front: format!("Line {}", line.number), back: escape_field(line.text) }
  }
}

impl Flashcard {
  pub fn csv_row(&self) -> String {
    format!("\"{}\",\"{}\"", self.front, self.back)
  }
}

pub fn cards(transcript: &str) -> Vec<Flashcard> {
  transcript_lines(transcript).iter().map(Flashcard::from).collect()
}

/// Render the full CSV body. A transcript with no usable lines yields the
/// header alone.
pub fn render_csv(cards: &[Flashcard]) -> String {
  let mut csv = String::with_capacity(CSV_HEADER.len() + 1 + cards.len() * 32);
  csv.push_str(CSV_HEADER);
  csv.push('\n');
  for card in cards {
    csv.push_str(&card.csv_row());
    csv.push('\n');
  }
  csv
}
