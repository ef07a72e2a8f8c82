use crate::relations::WindowEntity;
use crate::schema::Predicate;

pub fn build_relation_prompt(window_text: &str, entities: &[WindowEntity]) -> String {
    let entity_list = entities
        .iter()
        .map(|e| {
            let aliases: Vec<&str> = e
                .aliases
                .iter()
                .map(String::as_str)
                .filter(|a| *a != e.display_name)
                .collect();
            if aliases.is_empty() {
                format!("- {} ({})", e.display_name, e.entity_type)
            } else {
                format!(
                    "- {} ({}), also written: {}",
                    e.display_name,
                    e.entity_type,
                    aliases.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let predicates = Predicate::ALL
        .iter()
        .map(Predicate::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You extract relationships between characters of Javanese wayang stories.

ENTITIES (use ONLY these names, exactly as listed):
{entity_list}

ALLOWED PREDICATES:
{predicates}

RULES:
- "A SON_OF B" means A is the son of B. Subject comes first.
- LOCATED_IN links a person to a location, USES_WEAPON a person to a weapon.
- Use ALIAS_OF when the text says two listed names are the same person.
- If a name in the text is a shorter form of a listed name, use the listed name.
- Ignore anyone not in the list. Do not invent relationships.
- evidence is a short exact quote from the text.
- confidence is a number between 0 and 1.

OUTPUT (JSON only, no markdown):
{{"relations": [{{"subject": "...", "predicate": "SON_OF", "object": "...", "confidence": 0.9, "evidence": "..."}}]}}

TEXT:
{window_text}

JSON OUTPUT:"#
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations."#,
        invalid_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityType;

    #[test]
    fn test_relation_prompt_lists_entities_and_predicates() {
        let entities = vec![WindowEntity {
            entity_id: "p1".into(),
            display_name: "Resi Palasara".into(),
            entity_type: EntityType::Person,
            aliases: vec!["Palasara".into(), "Resi Palasara".into()],
        }];

        let prompt = build_relation_prompt("Sakri lahir dari ayah Resi Palasara.", &entities);

        assert!(prompt.contains("- Resi Palasara (Person), also written: Palasara"));
        assert!(prompt.contains("SON_OF"));
        assert!(prompt.contains("ALIAS_OF"));
        assert!(prompt.contains("Sakri lahir dari ayah Resi Palasara."));
    }
}
