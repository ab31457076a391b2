//! cliclack theme

use cliclack::ThemeState;
use console::Style;

/// Green-accented theme; cache hits and captures both read as success
#[derive(Debug, Clone, Default)]
pub struct StratumTheme;

impl cliclack::Theme for StratumTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().green(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().green(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().cyan(),
        }
    }
}

/// Install the theme globally
pub fn init_theme() {
    cliclack::set_theme(StratumTheme);
}
