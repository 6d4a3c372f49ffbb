//! Note selection predicates for `select_notes` / `apply_selected`.
//!
//! Predicates are `field op value` tokens over pitch/vel/start/dur with
//! operators `= != >= <= > <`. A selection remembers where it came from
//! (linear notes or a named pattern) so `apply_selected` can mutate the
//! same notes later.

use crate::error::{ClawError, Result};
use crate::model::{Note, Project};
use crate::time::parse_timecode;

/// Field a predicate tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Pitch,
    Velocity,
    Start,
    Duration,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// One parsed predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub op: Op,
    pub value: i64,
}

impl Predicate {
    pub fn matches(&self, note: &Note) -> bool {
        let v = match self.field {
            Field::Pitch => note.pitch as i64,
            Field::Velocity => note.velocity as i64,
            Field::Start => note.start as i64,
            Field::Duration => note.duration as i64,
        };
        match self.op {
            Op::Eq => v == self.value,
            Op::Ne => v != self.value,
            Op::Ge => v >= self.value,
            Op::Le => v <= self.value,
            Op::Gt => v > self.value,
            Op::Lt => v < self.value,
        }
    }
}

/// Parse one `field op value` token, e.g. `pitch>=60`, `start<2:0`.
///
/// Time-valued fields (start/dur) accept timecode values.
pub fn parse_predicate(project: &Project, token: &str) -> Result<Predicate> {
    // two-char ops first so ">=" doesn't parse as ">"
    const OPS: [(&str, Op); 6] = [
        ("!=", Op::Ne),
        (">=", Op::Ge),
        ("<=", Op::Le),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ];

    for (sym, op) in OPS {
        if let Some(idx) = token.find(sym) {
            let field_s = &token[..idx];
            let value_s = &token[idx + sym.len()..];
            let field = match field_s.trim().to_lowercase().as_str() {
                "pitch" => Field::Pitch,
                "vel" | "velocity" => Field::Velocity,
                "start" => Field::Start,
                "dur" | "duration" => Field::Duration,
                other => {
                    return Err(ClawError::InvalidInput(format!(
                        "unknown selection field: {}",
                        other
                    )))
                }
            };
            let value = match field {
                Field::Start | Field::Duration => parse_timecode(project, value_s)? as i64,
                _ => value_s.trim().parse::<i64>().map_err(|_| {
                    ClawError::InvalidInput(format!("invalid predicate value: {}", value_s))
                })?,
            };
            return Ok(Predicate { field, op, value });
        }
    }
    Err(ClawError::InvalidInput(format!(
        "invalid predicate (expected field op value): {}",
        token
    )))
}

/// Where a selection's notes live
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub track_index: usize,
    /// None selects from the track's linear notes
    pub pattern: Option<String>,
    /// Indices into that note list, ascending
    pub indices: Vec<usize>,
}

/// Select note indices on a track matching every predicate
pub fn select_notes(
    project: &Project,
    track_index: usize,
    pattern: Option<&str>,
    predicates: &[Predicate],
) -> Result<Selection> {
    let track = project
        .tracks
        .get(track_index)
        .ok_or_else(|| ClawError::InvalidInput("track index out of range".to_string()))?;

    let notes: &[Note] = match pattern {
        Some(name) => {
            &track
                .patterns
                .get(name)
                .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", name)))?
                .notes
        }
        None => &track.notes,
    };

    let indices = notes
        .iter()
        .enumerate()
        .filter(|(_, n)| predicates.iter().all(|p| p.matches(n)))
        .map(|(i, _)| i)
        .collect();

    Ok(Selection {
        track_index,
        pattern: pattern.map(str::to_string),
        indices,
    })
}

/// Mutation applied by `apply_selected`
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOp {
    Transpose(i32),
    VelocityScale(f64),
    VelocitySet(u8),
    Shift(i64),
    SetChance(f32),
    Mute(bool),
    Delete,
}

impl SelectionOp {
    pub fn parse(project: &Project, op: &str, arg: Option<&str>) -> Result<SelectionOp> {
        let need = |what: &str| -> Result<&str> {
            arg.ok_or_else(|| ClawError::InvalidInput(format!("apply_selected {} needs {}", op, what)))
        };
        match op.trim().to_lowercase().as_str() {
            "transpose" => Ok(SelectionOp::Transpose(
                need("semitones")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid semitones".to_string()))?,
            )),
            "vel_scale" => Ok(SelectionOp::VelocityScale(
                need("factor")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid factor".to_string()))?,
            )),
            "vel_set" => Ok(SelectionOp::VelocitySet(
                need("velocity")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid velocity".to_string()))?,
            )),
            "shift" => Ok(SelectionOp::Shift(
                parse_timecode(project, need("ticks")?)? as i64,
            )),
            "shift_back" => Ok(SelectionOp::Shift(
                -(parse_timecode(project, need("ticks")?)? as i64),
            )),
            "set_chance" => Ok(SelectionOp::SetChance(
                need("chance")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid chance".to_string()))?,
            )),
            "mute" => Ok(SelectionOp::Mute(matches!(
                need("0|1")?.trim(),
                "1" | "true" | "yes"
            ))),
            "delete" => Ok(SelectionOp::Delete),
            other => Err(ClawError::InvalidInput(format!(
                "unknown apply_selected op: {}",
                other
            ))),
        }
    }
}

/// Apply an operation to every selected note. Returns the count touched.
pub fn apply_selected(
    project: &mut Project,
    selection: &Selection,
    op: &SelectionOp,
) -> Result<usize> {
    let track = project
        .tracks
        .get_mut(selection.track_index)
        .ok_or_else(|| ClawError::InvalidInput("track index out of range".to_string()))?;

    let notes: &mut Vec<Note> = match &selection.pattern {
        Some(name) => {
            &mut track
                .patterns
                .get_mut(name)
                .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", name)))?
                .notes
        }
        None => &mut track.notes,
    };

    let mut touched = 0usize;
    if matches!(op, SelectionOp::Delete) {
        let before = notes.len();
        let mut keep = vec![true; notes.len()];
        for &i in &selection.indices {
            if i < keep.len() {
                keep[i] = false;
            }
        }
        let mut it = keep.iter();
        notes.retain(|_| *it.next().unwrap());
        touched = before - notes.len();
    } else {
        for &i in &selection.indices {
            let Some(n) = notes.get_mut(i) else { continue };
            touched += 1;
            match op {
                SelectionOp::Transpose(semi) => {
                    n.pitch = (n.pitch as i32 + semi).clamp(0, 127) as u8;
                }
                SelectionOp::VelocityScale(f) => {
                    n.velocity = ((n.velocity as f64 * f).round()).clamp(1.0, 127.0) as u8;
                }
                SelectionOp::VelocitySet(v) => {
                    n.velocity = (*v).clamp(1, 127);
                }
                SelectionOp::Shift(ticks) => {
                    n.start = (n.start as i64 + ticks).max(0) as u32;
                }
                SelectionOp::SetChance(c) => {
                    n.chance = c.clamp(0.0, 1.0);
                }
                SelectionOp::Mute(m) => {
                    n.mute = *m;
                }
                SelectionOp::Delete => unreachable!(),
            }
        }
    }

    if touched > 0 {
        project.dirty = true;
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;

    fn project() -> Project {
        let mut p = Project::new("sel", 120);
        let mut t = Track::new("Keys", 0);
        t.notes.push(Note::new(0, 120, 60, 100));
        t.notes.push(Note::new(480, 120, 64, 80));
        t.notes.push(Note::new(960, 240, 67, 120));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_parse_predicate_ops() {
        let p = project();
        assert_eq!(
            parse_predicate(&p, "pitch>=64").unwrap(),
            Predicate {
                field: Field::Pitch,
                op: Op::Ge,
                value: 64
            }
        );
        assert_eq!(parse_predicate(&p, "vel<100").unwrap().op, Op::Lt);
        assert_eq!(parse_predicate(&p, "dur!=120").unwrap().op, Op::Ne);
        // timecode values for start
        assert_eq!(parse_predicate(&p, "start>=1:0").unwrap().value, 1920);
        assert!(parse_predicate(&p, "flavor=salty").is_err());
        assert!(parse_predicate(&p, "pitch~60").is_err());
    }

    #[test]
    fn test_select_notes_filters() {
        let p = project();
        let preds = vec![
            parse_predicate(&p, "pitch>=64").unwrap(),
            parse_predicate(&p, "vel<=100").unwrap(),
        ];
        let sel = select_notes(&p, 0, None, &preds).unwrap();
        assert_eq!(sel.indices, vec![1]); // only (64, 80)
    }

    #[test]
    fn test_select_all_with_no_predicates() {
        let p = project();
        let sel = select_notes(&p, 0, None, &[]).unwrap();
        assert_eq!(sel.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_apply_transpose_and_vel() {
        let mut p = project();
        let sel = select_notes(&p, 0, None, &[parse_predicate(&p, "pitch=60").unwrap()]).unwrap();
        let n = apply_selected(&mut p, &sel, &SelectionOp::Transpose(12)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(p.tracks[0].notes[0].pitch, 72);

        let sel_all = select_notes(&p, 0, None, &[]).unwrap();
        apply_selected(&mut p, &sel_all, &SelectionOp::VelocityScale(0.5)).unwrap();
        assert_eq!(p.tracks[0].notes[0].velocity, 50);
    }

    #[test]
    fn test_apply_delete() {
        let mut p = project();
        let sel = select_notes(&p, 0, None, &[parse_predicate(&p, "vel>90").unwrap()]).unwrap();
        let removed = apply_selected(&mut p, &sel, &SelectionOp::Delete).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(p.tracks[0].notes.len(), 1);
        assert_eq!(p.tracks[0].notes[0].pitch, 64);
    }

    #[test]
    fn test_apply_mute_and_chance() {
        let mut p = project();
        let sel = select_notes(&p, 0, None, &[]).unwrap();
        apply_selected(&mut p, &sel, &SelectionOp::Mute(true)).unwrap();
        assert!(p.tracks[0].notes.iter().all(|n| n.mute));
        apply_selected(&mut p, &sel, &SelectionOp::SetChance(0.5)).unwrap();
        assert!(p.tracks[0].notes.iter().all(|n| n.chance == 0.5));
    }

    #[test]
    fn test_selection_in_pattern() {
        let mut p = project();
        let mut pat = crate::model::Pattern::new("a", 1920);
        pat.notes.push(Note::new(0, 120, 36, 110));
        p.tracks[0].patterns.insert("a".to_string(), pat);

        let sel = select_notes(&p, 0, Some("a"), &[]).unwrap();
        assert_eq!(sel.indices, vec![0]);
        apply_selected(&mut p, &sel, &SelectionOp::VelocitySet(64)).unwrap();
        assert_eq!(p.tracks[0].patterns["a"].notes[0].velocity, 64);

        assert!(select_notes(&p, 0, Some("ghost"), &[]).is_err());
    }

    #[test]
    fn test_selection_op_parse() {
        let p = project();
        assert!(matches!(
            SelectionOp::parse(&p, "transpose", Some("-2")).unwrap(),
            SelectionOp::Transpose(-2)
        ));
        assert!(matches!(
            SelectionOp::parse(&p, "delete", None).unwrap(),
            SelectionOp::Delete
        ));
        assert!(SelectionOp::parse(&p, "transpose", None).is_err());
        assert!(SelectionOp::parse(&p, "sparkle", Some("1")).is_err());
    }
}
