// Monitored device identity
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
}

impl Device {
    pub fn new(name: String) -> Self {
        let id = Self::format_id(&name);
        Self { id, name }
    }

    /// Convert "Bilge pump #2" to "bilgePump2"
    fn format_id(name: &str) -> String {
        let mut words: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut prev_lower = false;

        for c in name.chars() {
            if !c.is_alphanumeric() {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                prev_lower = false;
                continue;
            }
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }

        let mut id = String::new();
        for (i, word) in words.iter().enumerate() {
            let lower = word.to_lowercase();
            if i == 0 {
                id.push_str(&lower);
            } else {
                let mut chars = lower.chars();
                if let Some(first) = chars.next() {
                    id.extend(first.to_uppercase());
                    id.push_str(chars.as_str());
                }
            }
        }
        id
    }
}
