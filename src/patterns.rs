use std::sync::LazyLock;

use regex::Regex;

use crate::mapping::SpriteMap;

/// Identifier shapes whose integer assignments are eligible for rewriting.
///
/// Each shape is a separate pass over the line, in declaration order, and a
/// later pass sees the text produced by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariablePattern {
    /// The built-in `sprite_index` variable.
    SpriteIndex,
    /// Any identifier containing `spr`.
    ContainsSpr,
}

impl VariablePattern {
    pub const ALL: [VariablePattern; 2] = [
        VariablePattern::SpriteIndex,
        VariablePattern::ContainsSpr,
    ];

    pub fn label(self) -> &'static str {
        match self {
            VariablePattern::SpriteIndex => "sprite_index",
            VariablePattern::ContainsSpr => "*spr*",
        }
    }

    fn regex(self) -> &'static Regex {
        match self {
            VariablePattern::SpriteIndex => &SPRITE_INDEX,
            VariablePattern::ContainsSpr => &CONTAINS_SPR,
        }
    }
}

static SPRITE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sprite_index)\s*=\s*(\d+)\s*;").expect("sprite_index pattern is valid")
});

static CONTAINS_SPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w*spr\w*)\s*=\s*(\d+)\s*;").expect("spr pattern is valid")
});

/// One accepted substitution on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub pattern: VariablePattern,
    pub variable: String,
    pub old_id: String,
    pub new_id: String,
    /// The line as it was before any pass touched it.
    pub original: String,
    /// The line right after this substitution, earlier ones included.
    pub updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRewrite {
    pub text: String,
    pub substitutions: Vec<Substitution>,
}

impl LineRewrite {
    pub fn changed(&self, original: &str) -> bool {
        self.text != original
    }
}

pub fn rewrite_line(line: &str, map: &SpriteMap) -> LineRewrite {
    let mut text = line.to_string();
    let mut substitutions = Vec::new();
    for pattern in VariablePattern::ALL {
        text = apply_pattern(pattern, line, &text, map, &mut substitutions);
    }
    LineRewrite {
        text,
        substitutions,
    }
}

fn apply_pattern(
    pattern: VariablePattern,
    original: &str,
    current: &str,
    map: &SpriteMap,
    acc: &mut Vec<Substitution>,
) -> String {
    let mut out = String::with_capacity(current.len());
    let mut last = 0usize;

    for caps in pattern.regex().captures_iter(current) {
        let (Some(whole), Some(variable), Some(digits)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let Some(new_id) = map.get(digits.as_str()) else {
            continue;
        };

        out.push_str(&current[last..whole.start()]);
        out.push_str(variable.as_str());
        out.push_str(" = ");
        out.push_str(new_id);
        out.push(';');
        last = whole.end();

        acc.push(Substitution {
            pattern,
            variable: variable.as_str().to_string(),
            old_id: digits.as_str().to_string(),
            new_id: new_id.to_string(),
            original: original.to_string(),
            updated: format!("{out}{}", &current[last..]),
        });
    }

    out.push_str(&current[last..]);
    out
}
