//! Terminal output for `bul`.
//!
//! Honors `NO_COLOR` and the `--color` flag.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Pick a `ColorChoice`. `NO_COLOR` wins over the flag; anything else is auto.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// How a run of text is painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Heading,
    Detail,
    Good,
    Caution,
    Bad,
}

impl Tone {
    fn color_spec(self) -> ColorSpec {
        let mut style = ColorSpec::new();
        match self {
            Tone::Plain => {}
            Tone::Heading => {
                style.set_bold(true);
            }
            Tone::Detail => {
                style.set_fg(Some(Color::Cyan));
            }
            Tone::Good => {
                style.set_fg(Some(Color::Green)).set_bold(true);
            }
            Tone::Caution => {
                style.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            Tone::Bad => {
                style.set_fg(Some(Color::Red)).set_bold(true);
            }
        }
        style
    }
}

/// Per-unit result shown at the start of a `patch` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Patched,
    Skipped,
    Failed,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Patched => " PATCH ",
            Status::Skipped => " SKIP  ",
            Status::Failed => " FAIL  ",
        }
    }

    fn colors(self) -> (Color, Color) {
        match self {
            Status::Patched => (Color::Green, Color::White),
            Status::Skipped => (Color::Yellow, Color::Black),
            Status::Failed => (Color::Red, Color::White),
        }
    }
}

pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    /// Write `text` to stdout in the given tone, without a newline.
    pub fn paint(&mut self, tone: Tone, text: &str) {
        if tone == Tone::Plain {
            let _ = write!(self.stdout, "{}", text);
            return;
        }
        let _ = self.stdout.set_color(&tone.color_spec());
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    pub fn line(&mut self, tone: Tone, text: &str) {
        self.paint(tone, text);
        self.newline();
    }

    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    /// Badge, unit name, then an optional detail in the detail tone.
    pub fn status(&mut self, status: Status, name: &str, detail: Option<&str>) {
        let (bg, fg) = status.colors();
        let mut style = ColorSpec::new();
        style.set_bg(Some(bg)).set_fg(Some(fg)).set_bold(true);
        let _ = self.stdout.set_color(&style);
        let _ = write!(self.stdout, "{}", status.label());
        let _ = self.stdout.reset();
        self.paint(Tone::Plain, " ");
        self.paint(Tone::Heading, name);
        if let Some(detail) = detail {
            self.paint(Tone::Detail, &format!(" {}", detail));
        }
        self.newline();
    }

    /// A diagnostic on stderr.
    pub fn diagnostic(&mut self, text: &str) {
        let _ = self.stderr.set_color(&Tone::Bad.color_spec());
        let _ = writeln!(self.stderr, "{}", text);
        let _ = self.stderr.reset();
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}
