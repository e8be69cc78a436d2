//! CoNLL-U / CoNLL-X reader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{KakariError, Result};
use crate::types::{Sentence, Token};

const NUM_COLUMNS: usize = 10;

/// Streams sentences out of a CoNLL source.
///
/// Comment lines (`#`), multiword ranges (`1-2`) and empty nodes (`1.1`)
/// are skipped. Blocks with no regular tokens yield nothing.
pub struct ConllReader<R> {
    inner: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> ConllReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line_no: 0,
            buf: String::new(),
        }
    }

    fn next_sentence(&mut self) -> Result<Option<Sentence>> {
        let mut words = Vec::new();
        loop {
            self.buf.clear();
            let read = self.inner.read_line(&mut self.buf)?;
            if read == 0 {
                break;
            }
            self.line_no += 1;

            let line = self.buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                if words.is_empty() {
                    continue;
                }
                break;
            }
            if line.starts_with('#') {
                continue;
            }
            if let Some(token) = parse_token(line, self.line_no)? {
                if token.id != words.len() + 1 {
                    return Err(KakariError::Conll {
                        line: self.line_no,
                        message: format!(
                            "expected token id {}, found {}",
                            words.len() + 1,
                            token.id
                        ),
                    });
                }
                words.push(token);
            }
        }

        if words.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Sentence::new(words)))
        }
    }
}

impl<R: BufRead> Iterator for ConllReader<R> {
    type Item = Result<Sentence>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sentence().transpose()
    }
}

/// Reads every sentence from a CoNLL file.
pub fn read_conll<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let file = File::open(path.as_ref())?;
    let sentences = ConllReader::new(BufReader::new(file)).collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        path = %path.as_ref().display(),
        sentences = sentences.len(),
        "read CoNLL corpus"
    );
    Ok(sentences)
}

fn column(value: &str) -> Option<String> {
    if value == "_" || value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses one token line. Returns `Ok(None)` for multiword ranges and empty nodes.
fn parse_token(line: &str, line_no: usize) -> Result<Option<Token>> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() != NUM_COLUMNS {
        return Err(KakariError::Conll {
            line: line_no,
            message: format!("expected {NUM_COLUMNS} tab-separated columns, found {}", cols.len()),
        });
    }
    if cols[0].contains('-') || cols[0].contains('.') {
        return Ok(None);
    }

    let id = cols[0].parse::<usize>().map_err(|_| KakariError::Conll {
        line: line_no,
        message: format!("invalid token id {:?}", cols[0]),
    })?;
    let head = match cols[6] {
        "_" => None,
        raw => Some(raw.parse::<usize>().map_err(|_| KakariError::Conll {
            line: line_no,
            message: format!("invalid head {raw:?}"),
        })?),
    };

    Ok(Some(Token {
        id,
        form: cols[1].to_string(),
        lemma: column(cols[2]),
        upos: column(cols[3]),
        xpos: column(cols[4]),
        feats: column(cols[5]),
        head,
        deprel: column(cols[7]),
        deps: column(cols[8]),
        misc: column(cols[9]),
    }))
}
