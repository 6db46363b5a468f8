use qizhen_core::SubjectProfile;

use crate::models::SubjectLink;

const PORTAL: &str = include_str!("../static/portal.html");
const LANDING: &str = include_str!("../static/landing.html");
const CHAT: &str = include_str!("../static/chat.html");
const ROLE: &str = include_str!("../static/role.html");

pub fn link(subject: &SubjectProfile) -> SubjectLink {
    SubjectLink {
        slug: subject.slug.to_string(),
        title: subject.title.to_string(),
        description: subject.description.to_string(),
        url: format!("/{}", subject.slug),
        dialogue: subject.has_dialogue(),
    }
}

pub fn portal(subjects: &[&SubjectProfile]) -> String {
    let links: String = subjects
        .iter()
        .map(|subject| {
            let tag = if subject.has_dialogue() {
                r#"<span class="tag">角色对话</span>"#
            } else {
                ""
            };
            format!(
                "    <a class=\"card\" href=\"/{}\"><h2>{}</h2><p>{}</p>{}</a>\n",
                subject.slug, subject.title, subject.description, tag
            )
        })
        .collect();
    PORTAL.replace("{{links}}", &links)
}

pub fn landing(subject: &SubjectProfile) -> String {
    let dialogue_link = match subject.persona {
        Some(persona) => format!(
            "    <a href=\"/{}/role\">与{}对话</a>",
            subject.slug, persona.character
        ),
        None => String::new(),
    };
    fill(LANDING, subject).replace("{{dialogue_link}}", &dialogue_link)
}

pub fn chat(subject: &SubjectProfile) -> String {
    fill(CHAT, subject)
}

/// Only meaningful for subjects with a persona.
pub fn role(subject: &SubjectProfile) -> String {
    let (character, topic) = subject
        .persona
        .map(|p| (p.character, p.topic))
        .unwrap_or(("", subject.default_topic));
    fill(ROLE, subject)
        .replace("{{character}}", character)
        .replace("{{topic}}", topic)
}

fn fill(template: &str, subject: &SubjectProfile) -> String {
    template
        .replace("{{slug}}", subject.slug)
        .replace("{{title}}", subject.title)
        .replace("{{name}}", subject.name)
        .replace("{{description}}", subject.description)
        .replace("{{default_topic}}", subject.default_topic)
}
