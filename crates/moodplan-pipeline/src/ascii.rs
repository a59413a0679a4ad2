//! The built-in image classifier: a lookup table from emotion label to a
//! small piece of ASCII art, framed and stamped with the record it was drawn
//! for.

use std::convert::Infallible;

use chrono::Utc;
use moodplan_core::{
  emotion::{self, NEUTRAL},
  service::{Artifact, ImageClassifier},
};
use uuid::Uuid;

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Inner width of the frame, in characters.
const WIDTH: usize = 36;

const FACES: &[(&str, &[&str])] = &[
  ("happy", &["  .-\"\"\"-.  ", " / ^   ^ \\ ", "|    v    |", " \\ \\___/ / ", "  '-...-'  "]),
  ("excited", &[" \\ .-\"-. / ", "  / * * \\  ", " |  \\O/  | ", "  \\ \\_/ /  ", " / '---' \\ "]),
  ("hopeful", &["     *     ", "  .-\"\"\"-.  ", " / o   o \\ ", "|   \\_/   |", "  '-...-'  "]),
  ("anxious", &["  .-~~~-.  ", " / O   O \\ ", "|    ~    |", " \\  ~~~  / ", "  '-...-'  "]),
  ("stressed", &[" #.-\"\"\"-.# ", " / >   < \\ ", "|    _    |", " \\ /VVV\\ / ", "  '-...-'  "]),
  ("sad", &["  .-\"\"\"-.  ", " / ;   ; \\ ", "|    .    |", " \\  ___  / ", "  '-...-'  "]),
  ("angry", &["  .-\"\"\"-.  ", " / \\   / \\ ", "|  o   o  |", " \\ /===\\ / ", "  '-...-'  "]),
  ("neutral", &["  .-\"\"\"-.  ", " / -   - \\ ", "|    |    |", " \\  ---  / ", "  '-...-'  "]),
  ("tired", &["  .-\"\"\"-. z", " / -   - \\Z", "|    .    |", " \\   o   / ", "  '-...-'  "]),
  ("grateful", &["  .-\"\"\"-.  ", " / ^   ^ \\ ", "| <3   <3 |", " \\ \\___/ / ", "  '-...-'  "]),
];

fn face(label: &str) -> &'static [&'static str] {
  FACES
    .iter()
    .find(|(l, _)| *l == label)
    .or_else(|| FACES.iter().find(|(l, _)| *l == NEUTRAL))
    .map(|(_, art)| *art)
    .unwrap_or(&[])
}

fn border(out: &mut String) {
  out.push('+');
  out.push_str(&"-".repeat(WIDTH));
  out.push_str("+\n");
}

fn centered(out: &mut String, text: &str) {
  let len   = text.chars().count().min(WIDTH);
  let left  = (WIDTH - len) / 2;
  let right = WIDTH - len - left;
  out.push('|');
  out.push_str(&" ".repeat(left));
  out.extend(text.chars().take(WIDTH));
  out.push_str(&" ".repeat(right));
  out.push_str("|\n");
}

/// Draw the framed artifact text for `emotion`.
pub fn draw(emotion: &str, record_id: Uuid, generated: chrono::DateTime<Utc>) -> String {
  let label = emotion::normalize_label(emotion);
  let id    = record_id.simple().to_string();

  let mut out = String::new();
  border(&mut out);
  centered(&mut out, "");
  for line in face(label) {
    centered(&mut out, line);
  }
  centered(&mut out, "");
  centered(&mut out, &format!("[ {} ]", label.to_uppercase()));
  border(&mut out);
  centered(&mut out, &format!("record {}", &id[..8]));
  centered(&mut out, &generated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
  border(&mut out);
  out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiClassifier;

impl ImageClassifier for AsciiClassifier {
  type Error = Infallible;

  async fn render<'a>(&'a self, emotion: &'a str, record_id: Uuid) -> Result<Artifact, Infallible> {
    Ok(Artifact {
      content_type: CONTENT_TYPE.to_owned(),
      body:         draw(emotion, record_id, Utc::now()).into_bytes(),
    })
  }
}
