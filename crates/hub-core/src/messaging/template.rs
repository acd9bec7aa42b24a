//! Format-template rendering with `{username}`, `{content}`, `{group}`,
//! `{time}` substitutions (spec §4.9 step 5).

pub struct TemplateContext<'a> {
    pub username: &'a str,
    pub content: &'a str,
    pub group: &'a str,
    pub time: &'a str,
}

pub fn render(template: &str, ctx: &TemplateContext) -> String {
    template
        .replace("{username}", ctx.username)
        .replace("{content}", ctx.content)
        .replace("{group}", ctx.group)
        .replace("{time}", ctx.time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_placeholders() {
        let ctx = TemplateContext {
            username: "Bob",
            content: "hi",
            group: "g1",
            time: "12:00",
        };
        let rendered = render("<{username}> {content} [{group} @ {time}]", &ctx);
        assert_eq!(rendered, "<Bob> hi [g1 @ 12:00]");
    }

    #[test]
    fn leaves_unknown_placeholders_untouched() {
        let ctx = TemplateContext {
            username: "Bob",
            content: "hi",
            group: "g1",
            time: "12:00",
        };
        let rendered = render("{unknown} {username}", &ctx);
        assert_eq!(rendered, "{unknown} Bob");
    }
}
