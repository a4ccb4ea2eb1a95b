use ratatui::style::Color;

/// Colour palette shared by every view.
pub struct Theme {
  pub bg: Color,
  pub fg: Color,
  pub accent: Color,
  pub muted: Color,
  pub border: Color,
  pub highlight_fg: Color,
  pub highlight_bg: Color,
  pub stripe_bg: Color,
  pub status: Color,
  pub error: Color,
  pub key_fg: Color,
  pub key_bg: Color,
  pub locked: Color,
}

pub const THEME: Theme = Theme {
  bg: Color::Rgb(24, 20, 28),
  fg: Color::Rgb(232, 226, 236),
  accent: Color::Rgb(244, 114, 138),
  muted: Color::Rgb(140, 130, 150),
  border: Color::Rgb(70, 60, 80),
  highlight_fg: Color::Rgb(24, 20, 28),
  highlight_bg: Color::Rgb(244, 114, 138),
  stripe_bg: Color::Rgb(32, 27, 37),
  status: Color::Rgb(250, 204, 120),
  error: Color::Rgb(255, 110, 100),
  key_fg: Color::Rgb(24, 20, 28),
  key_bg: Color::Rgb(140, 130, 150),
  locked: Color::Rgb(120, 110, 130),
};
