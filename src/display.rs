//! Status display: now-playing metadata and the live dial view

use crate::backend::{PlayerStatus, SongInfo};
use crate::error::RadioResult;
use crate::state::DebugSnapshot;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use std::io;
use tracing::{debug, info};

/// What the active station is playing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlaying {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub file: String,
    pub elapsed: Option<u32>,
    pub time: Option<u32>,
}

impl NowPlaying {
    pub fn new(song: SongInfo, status: &PlayerStatus) -> Self {
        Self {
            artist: song.artist,
            album: song.album,
            title: song.title,
            file: song.file,
            elapsed: status.elapsed,
            time: status.duration,
        }
    }

    /// "Artist - Title", falling back to the file name
    pub fn headline(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => format!("{} - {}", self.artist, self.title),
            (true, false) => self.title.clone(),
            _ => self.file.clone(),
        }
    }
}

/// Receives one-way updates from the control loop
pub trait StatusDisplay {
    fn update_now_playing(&mut self, now_playing: &NowPlaying) -> RadioResult<()>;
    fn update_debug_view(&mut self, snapshot: &DebugSnapshot) -> RadioResult<()>;
}

fn clock(seconds: Option<u32>) -> String {
    match seconds {
        Some(s) => format!("{}:{:02}", s / 60, s % 60),
        None => "-:--".to_string(),
    }
}

/// One-line rendering of the dial:
/// `SetVol[50] LimVol[48] [0 --- 171 <180 512 --- 853 --- 1023 ]`.
///
/// The tuning value sits just before the nearest center to its right. A `<`
/// marks it as tuned to the station on its left, a `>` to the one on its right.
pub fn format_dial_line(snapshot: &DebugSnapshot) -> String {
    let mut parts = vec!["0".to_string()];
    let count = snapshot.frequencies.len();
    let boundaries = snapshot
        .frequencies
        .iter()
        .copied()
        .chain(std::iter::once(snapshot.full_range));
    for (i, freq) in boundaries.enumerate() {
        let is_right = match snapshot.right {
            Some(right) => right == i,
            None => i == count,
        };
        match snapshot.tuning {
            Some(tuning) if is_right => {
                let tuned_left = snapshot.station.is_some() && snapshot.station == snapshot.left;
                let tuned_right = snapshot.station.is_some() && snapshot.station == snapshot.right;
                parts.push(format!(
                    "{}{tuning:.0}{}",
                    if tuned_left { "<" } else { "" },
                    if tuned_right { ">" } else { "" },
                ));
            }
            _ => parts.push("---".to_string()),
        }
        parts.push(format!("{freq:.0}"));
    }
    format!(
        "SetVol[{}] LimVol[{}] [{} ]",
        snapshot.level,
        snapshot.cap_level,
        parts.join(" ")
    )
}

/// Logs updates through tracing
#[derive(Default)]
pub struct LogDisplay {
    last_line: Option<String>,
}

impl StatusDisplay for LogDisplay {
    fn update_now_playing(&mut self, now_playing: &NowPlaying) -> RadioResult<()> {
        info!(
            artist = %now_playing.artist,
            album = %now_playing.album,
            title = %now_playing.title,
            file = %now_playing.file,
            "now playing"
        );
        Ok(())
    }

    fn update_debug_view(&mut self, snapshot: &DebugSnapshot) -> RadioResult<()> {
        let line = format_dial_line(snapshot);
        if self.last_line.as_deref() != Some(line.as_str()) {
            debug!(dial = %line);
            self.last_line = Some(line);
        }
        Ok(())
    }
}

/// Full-screen dial view in the terminal
pub struct TerminalDisplay {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    now_playing: NowPlaying,
    hint: &'static str,
    raw_mode: bool,
}

impl TerminalDisplay {
    /// Take over the terminal; it is restored on drop. Raw mode is only
    /// needed when keys are read, and it keeps Ctrl-C from raising SIGINT.
    pub fn new(hint: &'static str, raw_mode: bool) -> RadioResult<Self> {
        if raw_mode {
            enable_raw_mode()?;
        }
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            now_playing: NowPlaying::default(),
            hint,
            raw_mode,
        })
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        if self.raw_mode {
            let _ = disable_raw_mode();
        }
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

impl StatusDisplay for TerminalDisplay {
    fn update_now_playing(&mut self, now_playing: &NowPlaying) -> RadioResult<()> {
        self.now_playing = now_playing.clone();
        Ok(())
    }

    fn update_debug_view(&mut self, snapshot: &DebugSnapshot) -> RadioResult<()> {
        let now_playing = &self.now_playing;
        let hint = self.hint;
        self.terminal
            .draw(|f| render_dial_view(f, snapshot, now_playing, hint))?;
        Ok(())
    }
}

/// Gradient bar: green, then yellow, then red
pub fn create_gradient_bar(width: usize, ratio: f64) -> Line<'static> {
    let ratio = ratio.clamp(0.0, 1.0);
    let filled = (ratio * width as f64) as usize;
    let partial_fill = (ratio * width as f64) - filled as f64;

    let spans = (0..width)
        .map(|i| {
            let color = if i < width / 3 {
                Color::Green
            } else if i < 2 * width / 3 {
                Color::Yellow
            } else {
                Color::Red
            };
            let ch = if i < filled {
                '█'
            } else if i == filled && partial_fill > 0.0 {
                match (partial_fill * 8.0) as usize {
                    0 | 1 => '░',
                    2 | 3 => '▒',
                    4 | 5 => '▓',
                    _ => '█',
                }
            } else {
                '░'
            };
            Span::styled(ch.to_string(), Style::default().fg(color))
        })
        .collect::<Vec<_>>();

    Line::from(spans)
}

/// The dial as a strip: station windows as `|`, the tuning marker as `▲`
fn dial_strip(width: usize, snapshot: &DebugSnapshot) -> Line<'static> {
    if width == 0 || snapshot.full_range <= 0.0 {
        return Line::default();
    }
    let column = |value: f64| {
        ((value / snapshot.full_range).clamp(0.0, 1.0) * (width - 1) as f64).round() as usize
    };
    let mut cells = vec![Span::raw("─"); width];
    for (id, &freq) in snapshot.frequencies.iter().enumerate() {
        let style = if snapshot.station == Some(id) {
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        cells[column(freq)] = Span::styled("|", style);
    }
    if let Some(tuning) = snapshot.tuning {
        cells[column(tuning)] = Span::styled("▲", Style::default().fg(Color::White));
    }
    Line::from(cells)
}

fn render_dial_view(f: &mut Frame, snapshot: &DebugSnapshot, now_playing: &NowPlaying, hint: &str) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(3),
        ])
        .split(size);

    let playing = Paragraph::new(vec![
        Line::from(now_playing.headline()),
        Line::from(format!(
            "{}  [{} / {}]",
            now_playing.album,
            clock(now_playing.elapsed),
            clock(now_playing.time)
        )),
    ])
    .block(Block::default().title("Now Playing").borders(Borders::ALL));
    f.render_widget(playing, chunks[0]);

    let strip_width = (chunks[1].width as usize).saturating_sub(crate::constants::ui::BAR_BORDER_WIDTH);
    let dial = Paragraph::new(vec![
        dial_strip(strip_width, snapshot),
        Line::from(format_dial_line(snapshot)),
    ])
    .block(Block::default().title("Dial").borders(Borders::ALL));
    f.render_widget(dial, chunks[1]);

    let bar_width = (chunks[2].width as usize).saturating_sub(crate::constants::ui::BAR_BORDER_WIDTH);
    let mut title = format!(
        "Volume {}% (knob {}%, cap {:.2})",
        snapshot.effective_percent, snapshot.level, snapshot.cap_factor
    );
    if let Some(left) = snapshot.shutdown_in {
        title.push_str(&format!(" - power off in {}s", left.as_secs()));
    }
    let gauge = Paragraph::new(create_gradient_bar(
        bar_width,
        f64::from(snapshot.effective_percent) / 100.0,
    ))
    .block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(gauge, chunks[2]);

    let lines: Vec<Line> = snapshot
        .stations
        .iter()
        .enumerate()
        .map(|(id, st)| {
            let server = match st.server {
                Some(s) => format!("server {s}"),
                None => "-".to_string(),
            };
            let text = format!("{} {:<16} {server}", if st.active { "▶" } else { " " }, st.name);
            let style = if st.active {
                Style::default().fg(Color::Green)
            } else if snapshot.station == Some(id) {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            Line::styled(text, style)
        })
        .collect();
    let stations = Paragraph::new(lines).block(
        Block::default()
            .title(format!("Stations ({hint})"))
            .borders(Borders::ALL),
    );
    f.render_widget(stations, chunks[3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tuning: Option<f64>, station: Option<usize>, left: Option<usize>, right: Option<usize>) -> DebugSnapshot {
        DebugSnapshot {
            level: 50,
            cap_level: 48,
            effective_percent: 48,
            cap_factor: 0.96,
            tuning,
            station,
            left,
            right,
            frequencies: vec![171.0, 512.0, 853.0],
            full_range: 1023.0,
            stations: Vec::new(),
            shutdown_in: None,
        }
    }

    #[test]
    fn test_dial_line_tuned_to_left_station() {
        let line = format_dial_line(&snapshot(Some(180.0), Some(0), Some(0), Some(1)));
        assert_eq!(line, "SetVol[50] LimVol[48] [0 --- 171 <180 512 --- 853 --- 1023 ]");
    }

    #[test]
    fn test_dial_line_tuned_to_right_station() {
        let line = format_dial_line(&snapshot(Some(500.0), Some(1), Some(0), Some(1)));
        assert_eq!(line, "SetVol[50] LimVol[48] [0 --- 171 500> 512 --- 853 --- 1023 ]");
    }

    #[test]
    fn test_dial_line_untuned_past_last_station() {
        let line = format_dial_line(&snapshot(Some(1000.0), None, Some(2), None));
        assert_eq!(line, "SetVol[50] LimVol[48] [0 --- 171 --- 512 --- 853 1000 1023 ]");
    }

    #[test]
    fn test_dial_line_before_first_reading() {
        let line = format_dial_line(&snapshot(None, None, None, None));
        assert_eq!(line, "SetVol[50] LimVol[48] [0 --- 171 --- 512 --- 853 --- 1023 ]");
    }

    #[test]
    fn test_gradient_bar_width_and_fill() {
        let bar = create_gradient_bar(12, 0.5);
        assert_eq!(bar.spans.len(), 12);
        assert_eq!(bar.spans[0].content, "█");
        assert_eq!(bar.spans[11].content, "░");
    }

    #[test]
    fn test_headline_fallbacks() {
        let mut np = NowPlaying {
            file: "a/b.mp3".into(),
            ..NowPlaying::default()
        };
        assert_eq!(np.headline(), "a/b.mp3");
        np.title = "Song".into();
        assert_eq!(np.headline(), "Song");
        np.artist = "Band".into();
        assert_eq!(np.headline(), "Band - Song");
        assert_eq!(clock(Some(125)), "2:05");
        assert_eq!(clock(None), "-:--");
    }
}
