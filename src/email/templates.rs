//! Transactional email bodies. Every template renders both HTML and plain text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn welcome(display_name: Option<&str>, app_url: &str) -> Rendered {
    let name = display_name.unwrap_or("there");
    Rendered {
        subject: "Welcome to Pick'em".into(),
        html: format!(
            "<p>Hey {},</p><p>You're in. Make your picks for this week at \
             <a href=\"{app_url}\">{app_url}</a>. Think you can beat Phil?</p>",
            escape(name)
        ),
        text: format!(
            "Hey {name},\n\nYou're in. Make your picks for this week at {app_url}. Think you can beat Phil?\n"
        ),
    }
}

pub fn weekly_reminder(display_name: Option<&str>, week: u8, app_url: &str) -> Rendered {
    let name = display_name.unwrap_or("there");
    let link = format!("{app_url}/picks?week={week}");
    Rendered {
        subject: format!("Week {week} picks are open"),
        html: format!(
            "<p>Hey {},</p><p>You haven't made your week {week} picks yet. \
             <a href=\"{link}\">Pick now</a> before kickoff.</p>",
            escape(name)
        ),
        text: format!("Hey {name},\n\nYou haven't made your week {week} picks yet. Pick now before kickoff: {link}\n"),
    }
}

pub fn magic_link(link: &str, ttl_minutes: i64) -> Rendered {
    Rendered {
        subject: "Your Pick'em sign-in link".into(),
        html: format!(
            "<p><a href=\"{}\">Sign in to Pick'em</a></p>\
             <p>The link expires in {ttl_minutes} minutes. If you didn't ask for it, ignore this email.</p>",
            escape(link)
        ),
        text: format!(
            "Sign in to Pick'em: {link}\n\nThe link expires in {ttl_minutes} minutes. If you didn't ask for it, ignore this email.\n"
        ),
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_escaped_in_html_only() {
        let mail = welcome(Some("<b>Al</b>"), "https://picks.test");
        assert!(mail.html.contains("&lt;b&gt;Al&lt;/b&gt;"));
        assert!(mail.text.contains("<b>Al</b>"));
    }

    #[test]
    fn reminder_links_to_the_week() {
        let mail = weekly_reminder(None, 7, "https://picks.test");
        assert_eq!(mail.subject, "Week 7 picks are open");
        assert!(mail.text.contains("https://picks.test/picks?week=7"));
        assert!(mail.text.starts_with("Hey there"));
    }

    #[test]
    fn magic_link_mentions_expiry() {
        let mail = magic_link("https://picks.test/auth/verify?token=a.b", 15);
        assert!(mail.html.contains("15 minutes"));
        assert!(mail.text.contains("token=a.b"));
    }
}
