use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rectangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Space,
    Enter,
    Tab,
    Backspace,
    Escape,
    Shift,
    Control,
    Alt,
    Up,
    Down,
    Left,
    Right,
    Function(u8),
}

impl Key {
    /// Key that produces `ch` when typed.
    pub fn for_char(ch: char) -> Self {
        match ch {
            ' ' => Key::Space,
            '\n' => Key::Enter,
            '\t' => Key::Tab,
            other => Key::Char(other),
        }
    }
}

/// A discrete goal produced by a decision policy. Consumed once by the
/// humanizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionIntent {
    Click {
        target: Point,
        #[serde(default)]
        button: MouseButton,
        /// Held for the duration of the click.
        #[serde(default)]
        modifier: Option<Key>,
    },
    /// Click somewhere inside `region`, favouring its center.
    ClickIn {
        region: Rectangle,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        modifier: Option<Key>,
    },
    MoveTo {
        target: Point,
    },
    TypeText {
        text: String,
    },
    HoldKey {
        key: Key,
        seconds: f64,
    },
    Pause {
        min_seconds: f64,
        max_seconds: f64,
    },
}

impl ActionIntent {
    pub fn click(target: Point) -> Self {
        Self::Click {
            target,
            button: MouseButton::Left,
            modifier: None,
        }
    }

    pub fn click_in(region: Rectangle) -> Self {
        Self::ClickIn {
            region,
            button: MouseButton::Left,
            modifier: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::ClickIn { .. } => "click_in",
            Self::MoveTo { .. } => "move_to",
            Self::TypeText { .. } => "type_text",
            Self::HoldKey { .. } => "hold_key",
            Self::Pause { .. } => "pause",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimitiveEvent {
    Move { x: i32, y: i32 },
    ButtonDown { button: MouseButton },
    ButtonUp { button: MouseButton },
    KeyDown { key: Key },
    KeyUp { key: Key },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Time since the start of the trace.
    pub offset: Duration,
    pub event: PrimitiveEvent,
}

/// Timed primitive events realising one intent. Offsets never decrease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTrace {
    pub events: Vec<TimedEvent>,
    /// Idle time after the last event before another trace may start.
    pub trailing: Duration,
}

impl ActionTrace {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Offset of the last event plus the trailing idle.
    pub fn duration(&self) -> Duration {
        self.events.last().map(|e| e.offset).unwrap_or_default() + self.trailing
    }

    /// Number of pointer-move samples.
    pub fn move_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.event, PrimitiveEvent::Move { .. }))
            .count()
    }

    pub fn is_monotonic(&self) -> bool {
        self.events.windows(2).all(|w| w[0].offset <= w[1].offset)
    }

    /// Final pointer position, if the trace moves the pointer.
    pub fn end_position(&self) -> Option<Point> {
        self.events.iter().rev().find_map(|e| match e.event {
            PrimitiveEvent::Move { x, y } => Some(Point::new(x, y)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_serializes_with_type_tag() {
        let json = serde_json::to_value(ActionIntent::click(Point::new(3, 4))).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["button"], "left");

        let back: ActionIntent =
            serde_json::from_str(r#"{"type":"hold_key","key":"shift","seconds":0.5}"#).unwrap();
        assert_eq!(
            back,
            ActionIntent::HoldKey {
                key: Key::Shift,
                seconds: 0.5
            }
        );
    }

    #[test]
    fn trace_summaries() {
        let trace = ActionTrace {
            events: vec![
                TimedEvent {
                    offset: Duration::from_millis(0),
                    event: PrimitiveEvent::Move { x: 1, y: 1 },
                },
                TimedEvent {
                    offset: Duration::from_millis(10),
                    event: PrimitiveEvent::Move { x: 2, y: 5 },
                },
                TimedEvent {
                    offset: Duration::from_millis(30),
                    event: PrimitiveEvent::ButtonDown {
                        button: MouseButton::Left,
                    },
                },
            ],
            trailing: Duration::from_millis(5),
        };
        assert_eq!(trace.move_count(), 2);
        assert_eq!(trace.end_position(), Some(Point::new(2, 5)));
        assert_eq!(trace.duration(), Duration::from_millis(35));
        assert!(trace.is_monotonic());
    }
}
