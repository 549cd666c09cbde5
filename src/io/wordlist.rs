//! CLDF-like wordlists: one `(language, concept, word, weight)` record per
//! row, in a CSV table with optional `# ` comment lines.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::WordlistError;
use crate::simulation::language::{Language, WordId};
use crate::simulation::network::SemanticNetwork;

pub const LANGUAGE_COLUMN: &str = "Language_ID";
pub const CONCEPT_COLUMN: &str = "Parameter_ID";
pub const WORD_COLUMN: &str = "Cognateset_ID";
pub const WEIGHT_COLUMN: &str = "Weight";

const COMMENT_PREFIX: &str = "# ";
/// Closes the rows of one node; followed by the node name.
const END_MARKER: &str = "# end ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordlistRecord {
    /// 1-based line in the source file.
    pub line: usize,
    pub language: String,
    pub concept: String,
    pub word: String,
    pub weight: Option<u64>,
}

/// Splits one CSV row, honoring double-quoted fields.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Contiguous rows of one language, as written for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    language: String,
    records: Range<usize>,
    /// 1-based line of the first row.
    line: usize,
    /// Byte offset of the first row.
    offset: u64,
    /// Closed by an end-of-node marker.
    complete: bool,
}

/// A parsed wordlist table together with the node blocks it consists of.
#[derive(Debug, Clone, Default)]
pub struct Wordlist {
    pub records: Vec<WordlistRecord>,
    blocks: Vec<Block>,
    /// Bytes of complete lines read.
    length: u64,
}

impl Wordlist {
    /// Records of blocks closed by an end-of-node marker.
    pub fn completed_records(&self) -> impl Iterator<Item = &WordlistRecord> + '_ {
        self.blocks
            .iter()
            .filter(|block| block.complete)
            .flat_map(|block| &self.records[block.records.clone()])
    }

    /// Every language with at least one row, complete or not.
    pub fn languages(&self) -> impl Iterator<Item = &str> + '_ {
        self.blocks.iter().map(|block| block.language.as_str())
    }

    /// The language whose block was cut off at the end of the table.
    pub fn interrupted(&self) -> Option<&str> {
        self.blocks
            .last()
            .filter(|block| !block.complete)
            .map(|block| block.language.as_str())
    }

    /// A simulation writer leaves at most one unfinished block, at the
    /// very end. Anything else was not produced by an interrupted run.
    pub fn check_resumable(&self) -> Result<(), WordlistError> {
        let earlier = self.blocks.len().saturating_sub(1);
        match self.blocks[..earlier].iter().find(|block| !block.complete) {
            Some(block) => Err(WordlistError::IncompleteBlock {
                line: block.line,
                language: block.language.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Length in bytes of the table without its unfinished tail, i.e.
    /// where appending may safely continue.
    pub fn resume_offset(&self) -> u64 {
        match self.blocks.last() {
            Some(block) if !block.complete => block.offset,
            _ => self.length,
        }
    }
}

/// Reads all records of a wordlist table.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<WordlistRecord>, WordlistError> {
    read_wordlist(reader).map(|wordlist| wordlist.records)
}

fn parse_record(
    fields: &[String],
    positions: &[Option<usize>; 4],
    line: usize,
) -> Result<WordlistRecord, WordlistError> {
    let get = |position: Option<usize>, name: &str| -> Result<String, WordlistError> {
        position
            .and_then(|p| fields.get(p))
            .map(|f| f.trim().to_string())
            .ok_or_else(|| WordlistError::Malformed {
                line,
                message: format!("missing {} field", name),
            })
    };
    let weight = match positions[3].and_then(|p| fields.get(p)) {
        Some(raw) if !raw.trim().is_empty() => {
            Some(raw.trim().parse::<u64>().map_err(|_| WordlistError::Malformed {
                line,
                message: format!("weight {:?} is not a non-negative integer", raw),
            })?)
        }
        _ => None,
    };
    Ok(WordlistRecord {
        line,
        language: get(positions[0], LANGUAGE_COLUMN)?,
        concept: get(positions[1], CONCEPT_COLUMN)?,
        word: get(positions[2], WORD_COLUMN)?,
        weight,
    })
}

/// Reads a wordlist table, keeping track of end-of-node markers.
///
/// An unterminated last line may be an interrupted write: it never closes
/// a block, and it is dropped if it does not parse.
pub fn read_wordlist<R: BufRead>(mut reader: R) -> Result<Wordlist, WordlistError> {
    let mut columns: Option<[Option<usize>; 4]> = None;
    let mut wordlist = Wordlist::default();
    let mut buffer = String::new();
    let mut number = 0;

    loop {
        buffer.clear();
        let read = reader.read_line(&mut buffer)?;
        if read == 0 {
            break;
        }
        number += 1;
        let terminated = buffer.ends_with('\n');
        let offset = wordlist.length;
        if terminated {
            wordlist.length += read as u64;
        }

        let trimmed = buffer.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix(END_MARKER) {
            if let Some(block) = wordlist.blocks.last_mut() {
                if terminated && !block.complete && block.language == name.trim() {
                    block.complete = true;
                }
            }
            continue;
        }
        if trimmed.starts_with('#') {
            continue;
        }
        let fields = split_row(trimmed);

        let Some(positions) = columns else {
            let find = |name: &str| fields.iter().position(|f| f.trim() == name);
            let positions = [
                find(LANGUAGE_COLUMN),
                find(CONCEPT_COLUMN),
                find(WORD_COLUMN),
                find(WEIGHT_COLUMN),
            ];
            for (position, name) in positions.iter().zip([
                LANGUAGE_COLUMN,
                CONCEPT_COLUMN,
                WORD_COLUMN,
            ]) {
                if position.is_none() {
                    return Err(WordlistError::MissingColumn(name));
                }
            }
            columns = Some(positions);
            continue;
        };

        let record = match parse_record(&fields, &positions, number) {
            Ok(record) => record,
            Err(err) if !terminated => {
                debug!(line = number, error = %err, "skipping unterminated last line");
                break;
            }
            Err(err) => return Err(err),
        };
        let index = wordlist.records.len();
        match wordlist.blocks.last_mut() {
            Some(block) if !block.complete && block.language == record.language => {
                block.records.end = index + 1;
            }
            _ => wordlist.blocks.push(Block {
                language: record.language.clone(),
                records: index..index + 1,
                line: number,
                offset,
                complete: false,
            }),
        }
        wordlist.records.push(record);
    }

    if columns.is_none() {
        return Err(WordlistError::Empty);
    }
    Ok(wordlist)
}

/// Reads the output of an interrupted run and reopens it for appending,
/// cut back to the end of its last finished node.
pub fn reopen_for_resume(path: &Path) -> Result<(Wordlist, File), WordlistError> {
    let wordlist = read_wordlist(BufReader::new(File::open(path)?))?;
    wordlist.check_resumable()?;
    let file = OpenOptions::new().append(true).open(path)?;
    let length = file.metadata()?.len();
    let offset = wordlist.resume_offset();
    if offset < length {
        warn!(
            path = ?path,
            bytes = length - offset,
            "dropping unfinished tail of previous output"
        );
        file.set_len(offset)?;
    }
    Ok((wordlist, file))
}

/// Groups records into languages, in order of first appearance. Records
/// without a weight take one from `fallback_weight`.
pub fn group_languages(
    records: &[WordlistRecord],
    network: &Arc<SemanticNetwork>,
    mut fallback_weight: impl FnMut() -> u64,
) -> Result<Vec<(String, Language)>, WordlistError> {
    let mut order: Vec<(String, Language)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let concept =
            network
                .concept(&record.concept)
                .ok_or_else(|| WordlistError::UnknownConcept {
                    line: record.line,
                    concept: record.concept.clone(),
                })?;
        let position = *positions.entry(record.language.as_str()).or_insert_with(|| {
            order.push((record.language.clone(), Language::new(Arc::clone(network))));
            order.len() - 1
        });
        let weight = record.weight.unwrap_or_else(&mut fallback_weight);
        order[position]
            .1
            .set_weight(concept, WordId::from_label(&record.word), weight);
    }

    debug!(languages = order.len(), records = records.len(), "grouped wordlist");
    Ok(order)
}

/// Destination for simulated languages.
pub trait LanguageSink: Send {
    fn write_language(&mut self, name: &str, language: &Language) -> Result<(), WordlistError>;
}

/// Writes languages as wordlist rows.
pub struct WordlistWriter<W: Write> {
    inner: W,
}

impl<W: Write> WordlistWriter<W> {
    /// Starts a new table, writing the header row.
    pub fn new(mut inner: W) -> Result<Self, WordlistError> {
        writeln!(
            inner,
            "{},{},{},{}",
            LANGUAGE_COLUMN, CONCEPT_COLUMN, WORD_COLUMN, WEIGHT_COLUMN
        )?;
        Ok(WordlistWriter { inner })
    }

    /// Continues an existing table, e.g. when resuming a run.
    pub fn append(inner: W) -> Self {
        WordlistWriter { inner }
    }

    pub fn write_comment(&mut self, comment: &str) -> Result<(), WordlistError> {
        for line in comment.lines() {
            writeln!(self.inner, "{}{}", COMMENT_PREFIX, line)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> LanguageSink for WordlistWriter<W> {
    fn write_language(&mut self, name: &str, language: &Language) -> Result<(), WordlistError> {
        let network = language.network();
        let escaped = escape(name);
        for (concept, word, weight) in language.records() {
            writeln!(
                self.inner,
                "{},{},{},{}",
                escaped,
                escape(network.label(concept)),
                word,
                weight
            )?;
        }
        // Without the marker a resumed run recomputes the node.
        writeln!(self.inner, "{}{}", END_MARKER, name)?;
        self.inner.flush()?;
        Ok(())
    }
}

impl LanguageSink for Vec<(String, Language)> {
    fn write_language(&mut self, name: &str, language: &Language) -> Result<(), WordlistError> {
        self.push((name.to_string(), language.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::network::tests::minimal_network;
    use std::io::Cursor;

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(split_row("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_row("\"a,b\",\"say \"\"hi\"\"\","), vec!["a,b", "say \"hi\"", ""]);
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn reads_records_with_comments() {
        let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\n\
                    # --seed 0\n\
                    A,left,0,10\n\
                    A,right,hand-1,\n";
        let records = read_records(Cursor::new(text)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].weight, Some(10));
        assert_eq!(records[1].word, "hand-1");
        assert_eq!(records[1].weight, None);
        assert_eq!(records[1].line, 4);
    }

    #[test]
    fn missing_columns_are_reported() {
        let err = read_records(Cursor::new("Language_ID,Weight\nA,1\n")).unwrap_err();
        assert!(matches!(err, WordlistError::MissingColumn(CONCEPT_COLUMN)));
        assert!(matches!(
            read_records(Cursor::new("# only comments\n")),
            Err(WordlistError::Empty)
        ));
    }

    #[test]
    fn bad_weight_is_malformed() {
        let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\nA,left,0,-3\n";
        assert!(matches!(
            read_records(Cursor::new(text)),
            Err(WordlistError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn written_languages_read_back_equal() {
        let network = Arc::new(minimal_network());
        let left = network.concept("left").unwrap();
        let right = network.concept("right").unwrap();
        let mut language = Language::new(Arc::clone(&network));
        language.set_weight(left, WordId(0), 10);
        language.set_weight(right, WordId(u64::MAX), 3);

        let mut writer = WordlistWriter::new(Vec::new()).unwrap();
        writer.write_comment("--seed 3").unwrap();
        writer.write_language("A", &language).unwrap();
        writer.write_language("B,C", &language).unwrap();
        let bytes = writer.into_inner();

        let records = read_records(Cursor::new(bytes)).unwrap();
        let languages = group_languages(&records, &network, || 1).unwrap();
        assert_eq!(languages.len(), 2);
        assert_eq!(languages[0].0, "A");
        assert_eq!(languages[1].0, "B,C");
        assert_eq!(languages[0].1, language);
        assert_eq!(languages[1].1, language);
    }

    #[test]
    fn unknown_concepts_are_rejected() {
        let network = Arc::new(minimal_network());
        let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\nA,up,0,1\n";
        let records = read_records(Cursor::new(text)).unwrap();
        assert!(matches!(
            group_languages(&records, &network, || 1),
            Err(WordlistError::UnknownConcept { line: 2, .. })
        ));
    }

    #[test]
    fn fallback_weight_fills_gaps() {
        let network = Arc::new(minimal_network());
        let text = "Language_ID,Parameter_ID,Cognateset_ID\nA,left,0\nA,right,1\n";
        let records = read_records(Cursor::new(text)).unwrap();
        let languages = group_languages(&records, &network, || 100).unwrap();
        assert_eq!(languages[0].1.total_weight(), 200);
    }

    fn two_node_table() -> (Arc<SemanticNetwork>, Language, Vec<u8>) {
        let network = Arc::new(minimal_network());
        let left = network.concept("left").unwrap();
        let right = network.concept("right").unwrap();
        let language = Language::from_records(
            Arc::clone(&network),
            [(left, WordId(0), 10), (right, WordId(1), 3)],
        );
        let mut writer = WordlistWriter::new(Vec::new()).unwrap();
        writer.write_language("R", &language).unwrap();
        writer.write_language("X", &language).unwrap();
        (network, language, writer.into_inner())
    }

    #[test]
    fn end_markers_close_blocks() {
        let (_, _, bytes) = two_node_table();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\n# end R\n"));
        let wordlist = read_wordlist(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(wordlist.languages().collect::<Vec<_>>(), vec!["R", "X"]);
        assert_eq!(wordlist.completed_records().count(), 4);
        assert_eq!(wordlist.interrupted(), None);
        assert_eq!(wordlist.resume_offset(), bytes.len() as u64);
    }

    #[test]
    fn cut_off_block_is_not_completed() {
        let (network, language, bytes) = two_node_table();
        let text = String::from_utf8(bytes).unwrap();
        let cut = text.find("X,right").unwrap();
        // The first row of X survived, the second stopped mid-line.
        let partial = &text[..cut + 4];
        let wordlist = read_wordlist(Cursor::new(partial)).unwrap();
        assert_eq!(wordlist.records.len(), 3);
        assert_eq!(wordlist.interrupted(), Some("X"));
        assert!(wordlist.check_resumable().is_ok());
        assert_eq!(
            wordlist.resume_offset() as usize,
            text.find("X,left").unwrap()
        );

        let completed: Vec<WordlistRecord> = wordlist.completed_records().cloned().collect();
        let languages = group_languages(&completed, &network, || 0).unwrap();
        assert_eq!(languages.len(), 1);
        assert_eq!(languages[0].0, "R");
        assert_eq!(languages[0].1, language);
    }

    #[test]
    fn last_line_without_newline_is_still_read() {
        let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\nA,left,0,1\nA,right,1,2";
        let records = read_records(Cursor::new(text)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].weight, Some(2));
    }

    #[test]
    fn unfinished_block_before_the_end_is_rejected() {
        let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\n\
                    A,left,0,1\n\
                    B,left,0,1\n\
                    # end B\n";
        let wordlist = read_wordlist(Cursor::new(text)).unwrap();
        assert!(matches!(
            wordlist.check_resumable(),
            Err(WordlistError::IncompleteBlock { line: 2, ref language }) if language == "A"
        ));
    }

    #[test]
    fn reopening_cuts_the_unfinished_tail() {
        let (_, _, bytes) = two_node_table();
        let text = String::from_utf8(bytes).unwrap();
        let keep = text.find("X,left").unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text[..keep + 14].as_bytes()).unwrap();

        let (wordlist, appending) = reopen_for_resume(file.path()).unwrap();
        assert_eq!(wordlist.interrupted(), Some("X"));
        let mut writer = WordlistWriter::append(appending);
        writer.write_comment("resumed").unwrap();
        drop(writer);
        let resumed = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(resumed, format!("{}# resumed\n", &text[..keep]));
    }
}
