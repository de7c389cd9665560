use crate::models::RunOptions;

const RESPONSE_SCHEMA: &str = r#"{
   "paragraphs": [
       { "text": "corrected paragraph...", "style": "normal|heading|italic|bold|quote" },
       ...
   ]
}"#;

/// Builds the developer instruction block sent ahead of every chunk in a run.
pub fn build_instructions(options: &RunOptions) -> String {
    let language = options.language.as_str();
    let mut prompt = format!(
        "You are a helpful assistant focusing on book/novel style corrections in {language}. \
         If the text is not a novel, adapt corrections appropriately. "
    );

    if options.categories.is_empty() {
        prompt.push_str(
            "Make only the minimal corrections needed for the text to read correctly. ",
        );
    } else {
        let tasks: Vec<&str> = options.categories.iter().map(|c| c.as_str()).collect();
        prompt.push_str(&format!("Fix only these aspects: {}. ", tasks.join(", ")));
    }

    prompt.push_str(
        "Do NOT add or remove meaning. Keep the author's style. \
         Focus on punctuation, spelling, capitalization, paragraph structuring. \
         If it's a novel, ensure dialogue and chapter headings are properly formatted. ",
    );

    let extra = options.extra_instructions.trim();
    if !extra.is_empty() {
        prompt.push_str(&format!("\nAdditional instructions:\n{extra}\n"));
    }

    format!(
        "{prompt}\n\n\
         Do NOT add new content. Return valid JSON only. The JSON must have this structure:\n\
         {RESPONSE_SCHEMA}\n\n\
         No extra keys. Only output valid JSON.\n\
         Now correct the following text:\n\n"
    )
}
