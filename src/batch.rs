use std::fs;
use std::io;
use std::path::Path;

use rayon::prelude::*;

use crate::automaton::Automaton;
use crate::hit::Hit;

/// All hits found in one scanned line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineMatches<'a, V> {
    pub line: String,
    pub hits: Vec<Hit<'a, V>>,
}

/// Scans batches of independent texts against one shared automaton.
///
/// The automaton is immutable after build, so lines can be distributed
/// across threads without synchronization.
pub struct BatchScanner<'a, V> {
    automaton: &'a Automaton<V>,
}

impl<'a, V: Sync> BatchScanner<'a, V> {
    /// Creates a batch scanner backed by the given automaton.
    pub fn new(automaton: &'a Automaton<V>) -> Self {
        Self { automaton }
    }

    /// Reads lines from a file and scans each against the automaton.
    pub fn scan_file(&self, path: &Path) -> io::Result<Vec<LineMatches<'a, V>>> {
        let content = fs::read_to_string(path)?;
        let lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();
        Ok(self.scan_lines(&lines))
    }

    /// Scans a list of texts in parallel.
    ///
    /// Uses rayon parallel iterator for distribution across available cores.
    /// Encounter order is preserved; blank lines are skipped.
    pub fn scan_lines(&self, lines: &[String]) -> Vec<LineMatches<'a, V>> {
        lines
            .par_iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| self.scan_line(line))
            .collect()
    }

    fn scan_line(&self, line: &str) -> LineMatches<'a, V> {
        let stripped = line.trim();
        LineMatches {
            line: stripped.to_string(),
            hits: self.automaton.search(stripped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::AutomatonBuilder;

    fn automaton() -> Automaton<String> {
        let mut builder = AutomatonBuilder::new(false);
        builder.add("sport", "sport".to_string());
        builder.add("news", "news".to_string());
        builder.build().unwrap()
    }

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scans_lines_in_encounter_order() {
        let automaton = automaton();
        let scanner = BatchScanner::new(&automaton);
        let results = scanner.scan_lines(&lines(&["daily news", "no match here", "sport page"]));

        assert_eq!(3, results.len());
        assert_eq!("daily news", results[0].line);
        assert_eq!(1, results[0].hits.len());
        assert!(results[1].hits.is_empty());
        assert_eq!(Some(&"sport".to_string()), results[2].hits[0].value);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let automaton = automaton();
        let scanner = BatchScanner::new(&automaton);
        let results = scanner.scan_lines(&lines(&["news", "   ", "", "sport"]));
        assert_eq!(2, results.len());
    }

    #[test]
    fn lines_are_trimmed_before_scanning() {
        let automaton = automaton();
        let scanner = BatchScanner::new(&automaton);
        let results = scanner.scan_lines(&lines(&["  news  "]));
        assert_eq!("news", results[0].line);
        assert_eq!((0, 4), (results[0].hits[0].begin, results[0].hits[0].end));
    }

    #[test]
    fn many_lines_scan_consistently_in_parallel() {
        let automaton = automaton();
        let scanner = BatchScanner::new(&automaton);
        let input: Vec<String> = (0..2_000)
            .map(|i| {
                if i % 2 == 0 {
                    format!("line {} sport", i)
                } else {
                    format!("line {}", i)
                }
            })
            .collect();

        let results = scanner.scan_lines(&input);
        assert_eq!(2_000, results.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(i % 2 == 0, !result.hits.is_empty(), "line {}", i);
        }
    }
}
