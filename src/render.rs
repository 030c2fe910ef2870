//! Byte classification and terminal output for captured events.

use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
    QueueableCommand,
};
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Consumer-side sink for captured bytes. Side effects only.
pub trait Render {
    fn render(&mut self, byte: u8);
}

impl<F: FnMut(u8)> Render for F {
    fn render(&mut self, byte: u8) {
        self(byte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    /// Printable ASCII, 32..=126.
    Printable,
    /// C0 controls and DEL.
    Control,
    /// Anything above 127.
    Extended,
}

pub fn classify(byte: u8) -> ByteClass {
    match byte {
        0x20..=0x7E => ByteClass::Printable,
        0x00..=0x1F | 0x7F => ByteClass::Control,
        _ => ByteClass::Extended,
    }
}

/// Human-readable form shown next to the decimal value.
pub fn glyph(byte: u8) -> String {
    match classify(byte) {
        ByteClass::Printable => format!("'{}'", byte as char),
        ByteClass::Control if byte == 0x7F => "^?".to_string(),
        ByteClass::Control => format!("^{}", (byte + 0x40) as char),
        ByteClass::Extended => format!("\\x{:02X}", byte),
    }
}

fn format_line(byte: u8, color: bool) -> String {
    let value = format!("{:>3}", byte);
    let glyph = glyph(byte);
    if !color {
        return format!("{} {}", value, glyph);
    }
    match classify(byte) {
        ByteClass::Printable => format!("{} {}", value.green().bold(), glyph.green()),
        ByteClass::Control => format!("{} {}", value.yellow().bold(), glyph.yellow()),
        ByteClass::Extended => format!("{} {}", value.magenta().bold(), glyph.magenta()),
    }
}

/// Writes one line per byte: the decimal value, color-coded by [`ByteClass`],
/// followed by its [`glyph`].
pub struct ColorRenderer<W: Write> {
    out: W,
    color: bool,
    write_failed: bool,
}

impl<W: Write> ColorRenderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            write_failed: false,
        }
    }

    /// Clear the screen and hide the cursor.
    pub fn enter(&mut self) -> io::Result<()> {
        self.out
            .queue(Clear(ClearType::All))?
            .queue(cursor::MoveTo(0, 0))?
            .queue(cursor::Hide)?;
        self.out.flush()
    }

    /// Show the cursor again and print `message` on its own line.
    pub fn leave(&mut self, message: &str) -> io::Result<()> {
        self.out.queue(cursor::Show)?;
        writeln!(self.out, "{}", message)?;
        self.out.flush()
    }

    pub fn finish(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Render for ColorRenderer<W> {
    fn render(&mut self, byte: u8) {
        let line = format_line(byte, self.color);
        let result = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if let Err(e) = result {
            // Keep capturing; the terminal may come back (e.g. after a resize).
            if !self.write_failed {
                tracing::error!(target: "render", "Failed to write event: {}", e);
                self.write_failed = true;
            }
        }
    }
}
