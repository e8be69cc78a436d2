//! CoNLL-U writer.

use std::io::Write;

use crate::error::Result;
use crate::types::{PredictedTree, Sentence};
use crate::vocab::Vocabulary;

fn field(value: Option<&str>) -> &str {
    value.unwrap_or("_")
}

/// Writes sentences in 10-column CoNLL-U, one blank line after each.
/// The root token is not written.
pub fn write_conll<W: Write>(writer: &mut W, sentences: &[Sentence]) -> Result<()> {
    for sentence in sentences {
        for token in sentence.words() {
            let head = token.head.map(|h| h.to_string());
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                token.id,
                token.form,
                field(token.lemma.as_deref()),
                field(token.upos.as_deref()),
                field(token.xpos.as_deref()),
                field(token.feats.as_deref()),
                field(head.as_deref()),
                field(token.deprel.as_deref()),
                field(token.deps.as_deref()),
                field(token.misc.as_deref()),
            )?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Copies `sentence` with heads and relations replaced by the prediction.
#[must_use]
pub fn annotate(sentence: &Sentence, tree: &PredictedTree, labels: &Vocabulary) -> Sentence {
    let mut annotated = sentence.clone();
    for (i, token) in annotated.words_mut().iter_mut().enumerate() {
        token.head = Some(tree.heads()[i]);
        token.deprel = labels.token(tree.labels()[i]).map(str::to_string);
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conll::ConllReader;
    use crate::types::{DecodeMode, Token};
    use crate::vocab::VocabularyBuilder;

    #[test]
    fn written_output_reads_back() {
        let mut dog = Token::new(2, "dog").with_arc(3, "nsubj").with_upos("NOUN");
        dog.misc = Some("SpaceAfter=No".into());
        let sentence = Sentence::new(vec![
            Token::new(1, "The").with_arc(2, "det").with_upos("DET"),
            dog,
            Token::new(3, "barks").with_arc(0, "root").with_upos("VERB"),
        ]);

        let mut out = Vec::new();
        write_conll(&mut out, std::slice::from_ref(&sentence)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("1\tThe\t_\tDET\t_\t_\t2\tdet\t_\t_\n"));
        assert!(text.ends_with("\n\n"));

        let back: Vec<Sentence> = ConllReader::new(text.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(back, vec![sentence]);
    }

    #[test]
    fn annotate_replaces_arcs() {
        let sentence = Sentence::new(vec![Token::new(1, "Hi"), Token::new(2, "there")]);
        let mut builder = VocabularyBuilder::new();
        builder.add("root");
        builder.add("advmod");
        let labels = builder.build(0);

        let tree = PredictedTree::new(vec![0, 1], vec![0, 1], DecodeMode::WellFormed);
        let annotated = annotate(&sentence, &tree, &labels);
        assert_eq!(annotated.gold_heads(), Some(vec![0, 1]));
        assert_eq!(annotated.gold_labels(), Some(vec!["root", "advmod"]));
    }
}
