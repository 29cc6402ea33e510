use crate::hit::Hit;

/// Trailing slots kept after `base`/`check` so that `base[s] + c + 1` stays
/// in bounds for every code unit `c` without a branch on the hot path.
pub(crate) const PADDING: usize = 65535;

/// Immutable Aho-Corasick automaton over a double-array trie.
///
/// Built by [`crate::builder::AutomatonBuilder`]; the runtime state is flat
/// integer arrays plus the caller-supplied values, so a built automaton can
/// be shared across threads freely.
///
/// Transition convention: from state `s` on code unit `c`, the target is
/// `t = base[s] + c + 1`, valid iff `check[t] == base[s]`. Offset 0 of each
/// block is the terminal marker slot holding `-(pattern_index) - 1`.
#[derive(Debug)]
pub struct Automaton<V> {
    pub(crate) base: Vec<i32>,
    pub(crate) check: Vec<i32>,
    pub(crate) fail: Vec<i32>,
    pub(crate) output: Vec<Option<Box<[u32]>>>,
    pub(crate) key_lengths: Vec<u32>,
    pub(crate) values: Option<Vec<V>>,
    pub(crate) ignore_case: bool,
}

/// Maps a UTF-16 code unit to its invariant upper-case form.
///
/// Per-unit: surrogates pass through undecoded, and mappings that would not
/// stay a single BMP unit (e.g. 'ß') leave the unit unchanged.
pub(crate) fn fold_unit(unit: u16) -> u16 {
    match char::from_u32(u32::from(unit)) {
        Some(ch) => {
            let mut upper = ch.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(up), None) if (up as u32) < 0x1_0000 => up as u16,
                _ => unit,
            }
        }
        None => unit,
    }
}

impl<V> Automaton<V> {
    pub(crate) fn from_parts(
        base: Vec<i32>,
        check: Vec<i32>,
        fail: Vec<i32>,
        output: Vec<Option<Box<[u32]>>>,
        key_lengths: Vec<u32>,
        values: Option<Vec<V>>,
        ignore_case: bool,
    ) -> Self {
        Self {
            base,
            check,
            fail,
            output,
            key_lengths,
            values,
            ignore_case,
        }
    }

    /// Number of patterns the automaton was built from.
    pub fn pattern_count(&self) -> usize {
        self.key_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_lengths.is_empty()
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Value associated with the pattern at `index`, or `None` when the
    /// automaton was loaded without values. Callers promise
    /// `index < pattern_count()`.
    pub fn value_at(&self, index: usize) -> Option<&V> {
        self.values.as_ref().map(|values| &values[index])
    }

    /// Exact-match lookup: the value of the pattern equal to `key`.
    pub fn value_of(&self, key: &str) -> Option<&V> {
        let index = self.exact_match(key)?;
        self.values.as_ref().map(|values| &values[index])
    }

    /// Scans `text` and collects every hit, including overlapping ones,
    /// ordered by end position.
    pub fn search(&self, text: &str) -> Vec<Hit<'_, V>> {
        let mut hits = Vec::new();
        self.search_with(text, |hit| {
            hits.push(hit);
            true
        });
        hits
    }

    /// Scans `text`, invoking `visitor` per hit. A `false` return halts the
    /// scan immediately.
    pub fn search_with<'a, F>(&'a self, text: &str, visitor: F)
    where
        F: FnMut(Hit<'a, V>) -> bool,
    {
        self.scan(text.encode_utf16(), visitor);
    }

    /// Scans a UTF-16 code-unit buffer. Scan a sub-range by slicing:
    /// `search_units(&buffer[start..start + len], visitor)`.
    pub fn search_units<'a, F>(&'a self, units: &[u16], visitor: F)
    where
        F: FnMut(Hit<'a, V>) -> bool,
    {
        self.scan(units.iter().copied(), visitor);
    }

    /// Returns true as soon as any pattern occurs in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        let mut found = false;
        self.search_with(text, |_| {
            found = true;
            false
        });
        found
    }

    /// First hit by end position, or `None`.
    pub fn find_first(&self, text: &str) -> Option<Hit<'_, V>> {
        let mut first = None;
        self.search_with(text, |hit| {
            first = Some(hit);
            false
        });
        first
    }

    fn scan<'a, I, F>(&'a self, units: I, mut visitor: F)
    where
        I: IntoIterator<Item = u16>,
        F: FnMut(Hit<'a, V>) -> bool,
    {
        let mut state = 0usize;
        for (pos, unit) in units.into_iter().enumerate() {
            let unit = if self.ignore_case { fold_unit(unit) } else { unit };
            state = self.step(state, unit);
            if let Some(patterns) = &self.output[state] {
                let end = pos + 1;
                for &pattern in patterns.iter() {
                    let hit = Hit {
                        begin: end - self.key_lengths[pattern as usize] as usize,
                        end,
                        pattern_index: pattern as usize,
                        value: self.values.as_ref().map(|values| &values[pattern as usize]),
                    };
                    if !visitor(hit) {
                        return;
                    }
                }
            }
        }
    }

    /// One input unit: follow goto, falling back along failure links until a
    /// transition succeeds. Failure chains end at the root, whose goto
    /// always succeeds, so this terminates.
    #[inline]
    fn step(&self, mut state: usize, unit: u16) -> usize {
        loop {
            if let Some(next) = self.goto_state(state, unit) {
                return next;
            }
            state = self.fail[state] as usize;
        }
    }

    #[inline]
    fn goto_state(&self, state: usize, unit: u16) -> Option<usize> {
        let b = self.base[state];
        let target = (b + i32::from(unit) + 1) as usize;
        match self.check.get(target) {
            Some(&c) if c == b => Some(target),
            _ if state == 0 => Some(0),
            _ => None,
        }
    }

    /// Walks the double array over `key` exactly; on success the terminal
    /// slot `base[s]` holds `-(pattern_index) - 1`.
    fn exact_match(&self, key: &str) -> Option<usize> {
        let mut b = self.base[0];
        for unit in key.encode_utf16() {
            let unit = if self.ignore_case { fold_unit(unit) } else { unit };
            let p = (b + i32::from(unit) + 1) as usize;
            match self.check.get(p) {
                Some(&c) if c == b => b = self.base[p],
                _ => return None,
            }
        }
        let p = usize::try_from(b).ok()?;
        match self.check.get(p) {
            Some(&c) if c == b && self.base[p] < 0 => Some((-self.base[p] - 1) as usize),
            _ => None,
        }
    }
}
