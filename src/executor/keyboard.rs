//! Keystroke planning for typed text, including the occasional slip onto a
//! neighbouring key that gets corrected with backspace.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::KeyboardConfig;
use crate::executor::sampling::chance;
use crate::executor::types::Key;
use crate::executor::variance::{Metric, VariationHistory};

const QWERTY_ROWS: [&str; 4] = ["1234567890", "qwertyuiop", "asdfghjkl", "zxcvbnm"];

/// One key press: wait `delay` seconds, press, hold for `hold` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keystroke {
    pub key: Key,
    pub delay: f64,
    pub hold: f64,
}

/// A key next to `ch` on the same QWERTY row, keeping its case.
pub fn neighbour_key<R: Rng + ?Sized>(rng: &mut R, ch: char) -> Option<char> {
    let lower = ch.to_ascii_lowercase();
    let row: Vec<char> = QWERTY_ROWS.iter().find(|r| r.contains(lower))?.chars().collect();
    let at = row.iter().position(|c| *c == lower)?;
    let mut options = Vec::with_capacity(2);
    if at > 0 {
        options.push(row[at - 1]);
    }
    if at + 1 < row.len() {
        options.push(row[at + 1]);
    }
    let picked = *options.choose(rng)?;
    Some(if ch.is_ascii_uppercase() {
        picked.to_ascii_uppercase()
    } else {
        picked
    })
}

pub fn plan_typing<R: Rng + ?Sized>(
    rng: &mut R,
    text: &str,
    config: &KeyboardConfig,
    history: &mut VariationHistory,
) -> Vec<Keystroke> {
    let mut strokes = Vec::with_capacity(text.len());
    let stroke = |rng: &mut R, history: &mut VariationHistory, key: Key, extra_delay: f64| {
        let delay = history.biased_sample(&mut *rng, Metric::KeystrokeDelay, |r| {
            config.keystroke_delay.sample(r)
        });
        Keystroke {
            key,
            delay: delay + extra_delay,
            hold: config.key_hold.sample(rng),
        }
    };

    for ch in text.chars() {
        if chance(&mut *rng, config.correction_probability) {
            if let Some(wrong) = neighbour_key(&mut *rng, ch) {
                strokes.push(stroke(&mut *rng, &mut *history, Key::Char(wrong), 0.0));
                let noticed = config.correction_pause.sample(&mut *rng);
                strokes.push(stroke(&mut *rng, &mut *history, Key::Backspace, noticed));
            }
        }
        strokes.push(stroke(&mut *rng, &mut *history, Key::for_char(ch), 0.0));
    }
    strokes
}
