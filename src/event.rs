/// A single unit captured from the input stream.
///
/// `EndOfStream` is distinct from every byte value, so a `0x00` or `0xFF` read
/// from the terminal can never be confused with the source closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEvent {
    Byte(u8),
    EndOfStream,
}

impl KeyEvent {
    pub fn byte(self) -> Option<u8> {
        match self {
            Self::Byte(b) => Some(b),
            Self::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl From<u8> for KeyEvent {
    fn from(byte: u8) -> Self {
        Self::Byte(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_is_not_a_byte() {
        for b in 0..=u8::MAX {
            assert_ne!(KeyEvent::from(b), KeyEvent::EndOfStream);
        }
        assert_eq!(KeyEvent::EndOfStream.byte(), None);
        assert_eq!(KeyEvent::Byte(0).byte(), Some(0));
    }
}
