//! Text handed to providers, and the canned reply used when none is available.
//!
//! `code` and `language` are interpolated verbatim.

pub fn system_prompt(language: &str, code: &str) -> String {
    format!(
        "You are an expert coding assistant. Help users write and improve code.\n\
         \n\
         Current code ({language}):\n\
         ```{language}\n\
         {code}\n\
         ```\n\
         \n\
         Provide concise, working code with explanations."
    )
}

pub fn fallback_text(language: &str, code: &str) -> String {
    format!(
        "I can see you're working with {language} code!\n\
         \n\
         Your current code:\n\
         ```{language}\n\
         {code}\n\
         ```\n\
         \n\
         I can help you with:\n\
         - Code improvements and optimizations\n\
         - Bug fixes and debugging\n\
         - Adding new features\n\
         - Code explanations\n\
         - Best practices\n\
         \n\
         To enable full AI capabilities, make sure your API keys are properly configured for your preferred AI providers."
    )
}
