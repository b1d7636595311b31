//! Prompts sent to the vision model.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here are
//! used only when no override is provided. The schema named in
//! [`MENU_SYSTEM_PROMPT`] must stay in sync with [`crate::menu::MenuItem`].

/// Default system prompt: the menu item schema the reply must follow.
pub const MENU_SYSTEM_PROMPT: &str = r#"You are a menu analysis expert. Extract menu items from the image and format them into structured JSON data.
For each menu item, provide:
- name: The name of the dish
- prices: Array of prices (if multiple options exist)
- priceLabels: Array of labels corresponding to prices (e.g., "Half", "Full")
- description: Brief description of the dish if available, otherwise provide a simple description
- labels: Array of relevant labels (e.g., "veg", "non-veg", "spicy", etc.)

Return ONLY a JSON array of menu items without any additional text."#;

/// User-turn instruction sent alongside the image.
pub const USER_INSTRUCTION: &str = "Extract menu items from this image and format them according to the specified JSON structure. Ensure prices are numbers, not strings.";
