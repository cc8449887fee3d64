use crate::chunking::normalize_whitespace;
use crate::references::ReferenceGrammar;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub markdown: String,
    pub replaced: usize,
    pub missing: usize,
}

/// References without a stored caption are left as they are.
pub fn splice(markdown: &str, captions: &BTreeMap<u32, String>, grammar: &ReferenceGrammar) -> Splice {
    let references = grammar.scan(markdown);
    let mut output = markdown.to_string();
    let mut replaced = 0;
    let mut missing = 0;

    for reference in references.iter().rev() {
        let target = reference.target(markdown).unwrap_or_default();
        let caption = grammar
            .ordinal_of(target)
            .and_then(|ordinal| captions.get(&ordinal));

        match caption {
            Some(text) => {
                output.replace_range(reference.span.clone(), &clean_caption(text));
                replaced += 1;
            }
            None => {
                warn!(
                    reference = &markdown[reference.span.clone()],
                    "no description for image reference, leaving it in place"
                );
                missing += 1;
            }
        }
    }

    Splice {
        markdown: output,
        replaced,
        missing,
    }
}

fn clean_caption(text: &str) -> String {
    let visible = text
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>();
    normalize_whitespace(&visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captions(entries: &[(u32, &str)]) -> BTreeMap<u32, String> {
        entries
            .iter()
            .map(|(ordinal, text)| (*ordinal, text.to_string()))
            .collect()
    }

    #[test]
    fn references_are_replaced_by_caption_text() -> Result<(), Box<dyn std::error::Error>> {
        let grammar = ReferenceGrammar::new()?;
        let markdown = "Uno\n\n![Image](imagenes_extraidas/image1.png)\n\nDos <img src=\"imagenes_extraidas/image2.png\"> fin";
        let result = splice(
            markdown,
            &captions(&[(1, "A rabbit\n  appears"), (2, "A hat\tis shown\u{7}")]),
            &grammar,
        );

        assert_eq!(result.replaced, 2);
        assert_eq!(result.markdown, "Uno\n\nA rabbit appears\n\nDos A hat is shown fin");
        Ok(())
    }

    #[test]
    fn text_before_a_reference_is_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let grammar = ReferenceGrammar::new()?;
        let prefix = "Antes del pase secreto. ";
        let markdown = format!("{prefix}![x](imagenes_extraidas/image1.png) después");
        let result = splice(&markdown, &captions(&[(1, "una descripción mucho más larga")]), &grammar);

        assert!(result.markdown.starts_with(prefix));
        assert!(result.markdown.ends_with(" después"));
        Ok(())
    }

    #[test]
    fn uncaptioned_references_are_kept() -> Result<(), Box<dyn std::error::Error>> {
        let grammar = ReferenceGrammar::new()?;
        let markdown = "![a](imagenes_extraidas/image1.png) ![b](imagenes_extraidas/image2.png) ![c](otra.png)";
        let result = splice(markdown, &captions(&[(2, "sombrero")]), &grammar);

        assert_eq!(result.replaced, 1);
        assert_eq!(result.missing, 2);
        assert_eq!(
            result.markdown,
            "![a](imagenes_extraidas/image1.png) sombrero ![c](otra.png)"
        );
        Ok(())
    }

    #[test]
    fn splicing_twice_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let grammar = ReferenceGrammar::new()?;
        let descriptions = captions(&[(1, "un conejo")]);
        let first = splice("Mira ![a](imagenes_extraidas/image1.png).", &descriptions, &grammar);
        let second = splice(&first.markdown, &descriptions, &grammar);

        assert_eq!(second.markdown, first.markdown);
        assert_eq!(second.replaced, 0);
        Ok(())
    }
}
