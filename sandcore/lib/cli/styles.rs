//! Terminal styling for the CLI.

use std::{
    fmt::Write,
    io::IsTerminal,
    sync::LazyLock,
};

use clap::builder::styling::{AnsiColor, Effects, Style, Styles};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Whether stdout is an interactive terminal that renders ANSI escapes.
static IS_ANSI_TERMINAL: LazyLock<bool> = LazyLock::new(|| {
    std::io::stdout().is_terminal()
        && std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").map_or(true, |term| term != "dumb")
});

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A trait for applying Styles defined in [`styles`] to text.
pub trait AnsiStyles {
    /// Apply header style to text
    fn header(&self) -> String;

    /// Apply literal style to text
    fn literal(&self) -> String;

    /// Apply placeholder style to text
    fn placeholder(&self) -> String;

    /// Apply error style to text
    fn error(&self) -> String;

    /// Apply valid style to text
    fn valid(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a `Styles` object with the default styles for the CLI.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

fn apply_style(text: &str, style: &Style) -> String {
    render(text, style, *IS_ANSI_TERMINAL)
}

fn render(text: &str, style: &Style, ansi: bool) -> String {
    if !ansi {
        return text.to_string();
    }

    let mut styled = String::with_capacity(text.len() + 20);
    let _ = write!(styled, "{}", style);
    styled.push_str(text);
    let _ = write!(styled, "{}", style.render_reset());
    styled
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T> AnsiStyles for T
where
    T: AsRef<str> + ?Sized,
{
    fn header(&self) -> String {
        apply_style(self.as_ref(), styles().get_header())
    }

    fn literal(&self) -> String {
        apply_style(self.as_ref(), styles().get_literal())
    }

    fn placeholder(&self) -> String {
        apply_style(self.as_ref(), styles().get_placeholder())
    }

    fn error(&self) -> String {
        apply_style(self.as_ref(), styles().get_error())
    }

    fn valid(&self) -> String {
        apply_style(self.as_ref(), styles().get_valid())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let styles = styles();
        assert_eq!(render("test", styles.get_header(), false), "test");
        assert_eq!(render("test", styles.get_error(), false), "test");
    }

    #[test]
    fn test_render_ansi() {
        let styles = styles();

        let header = render("test", styles.get_header(), true);
        assert!(header.contains("\x1b[1m"));
        assert!(header.contains("\x1b[33m"));
        assert!(header.contains("test"));
        assert!(header.ends_with("\x1b[0m"));

        let literal = render("test", styles.get_literal(), true);
        assert!(literal.contains("\x1b[34m"));
    }
}
