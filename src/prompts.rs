//! Prompt templates. Every template is a pure function of its inputs, and
//! each one is picked with an exhaustive match on the target kind.

use crate::target::TargetKind;

fn subject(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Person => "person",
        TargetKind::Company => "company",
    }
}

fn focus_list(focus: &[String]) -> String {
    if focus.is_empty() {
        "all fields".to_string()
    } else {
        focus.join(", ")
    }
}

/// Asks for exactly `number_of_queries` search queries covering the fields
/// in `schema_json`.
pub fn query_writing(kind: TargetKind, info: &str, schema_json: &str, number_of_queries: usize) -> String {
    let hints = match kind {
        TargetKind::Person => {
            "Good queries combine the person's name with their company, title or email domain. \
             Include one query that targets their LinkedIn profile (site:linkedin.com/in)."
        }
        TargetKind::Company => {
            "Good queries combine the company name with its website domain or industry. \
             Cover the official site, LinkedIn (site:linkedin.com/company), Crunchbase and recent \
             funding news."
        }
    };

    format!(
        "You are building web search queries to research a {subject}.\n\n\
         <{subject}>\n{info}</{subject}>\n\n\
         The queries must find the information described by this schema:\n\
         <schema>\n{schema_json}\n</schema>\n\n\
         {hints}\n\n\
         Write exactly {number_of_queries} distinct search queries. Each query should target a \
         different aspect of the schema.\n\n\
         Respond with a JSON object of the form \
         {{\"queries\": [{{\"query\": \"...\", \"aspect\": \"...\", \"rationale\": \"...\"}}]}} \
         and nothing else.",
        subject = subject(kind),
    )
}

/// Asks for a record with every schema field, concentrating on `focus`.
pub fn note_taking(
    kind: TargetKind,
    info: &str,
    sources: &str,
    schema_json: &str,
    focus: &[String],
    today: &str,
) -> String {
    let care = match kind {
        TargetKind::Person => {
            "Several people can share a name. Only use sources that clearly describe this \
             person, matching the company or email given above when available. Years of \
             experience count full-time roles only."
        }
        TargetKind::Company => {
            "Several companies can share a name. Only use sources that clearly describe this \
             company. Prefer the most recent funding information and state round dates when the \
             sources give them."
        }
    };

    format!(
        "Today is {today}. You are taking structured notes about a {subject} from web search \
         results.\n\n\
         <{subject}>\n{info}</{subject}>\n\n\
         <sources>\n{sources}\n</sources>\n\n\
         Fill in every field of this schema:\n\
         <schema>\n{schema_json}\n</schema>\n\n\
         Concentrate on these fields: {focus}.\n\n\
         {care}\n\n\
         Only use facts stated in the sources. If the sources do not contain a value, use \
         \"Not Available\" for single values and an empty list for list fields. Do not guess and \
         do not mask or abbreviate values.\n\n\
         Respond with a single JSON object that uses exactly the schema's field names.",
        subject = subject(kind),
        focus = focus_list(focus),
    )
}

/// Asks for a completeness verdict on the accumulated record.
pub fn review(kind: TargetKind, schema_json: &str, info_json: &str, focus: &[String], today: &str) -> String {
    let stale = match kind {
        TargetKind::Person => "a role or current company that the sources suggest has changed",
        TargetKind::Company => "funding information that looks older than a year",
    };

    format!(
        "Today is {today}. You are reviewing structured research about a {subject} for \
         quality and completeness.\n\n\
         Required schema:\n<schema>\n{schema_json}\n</schema>\n\n\
         Extracted information:\n<extracted_info>\n{info_json}\n</extracted_info>\n\n\
         The last research round concentrated on: {focus}.\n\n\
         A field is missing when it is absent, holds \"Not Available\" or another placeholder \
         such as \"unknown\", holds a masked or partial value, is an empty list, or looks \
         outdated, for example {stale}.\n\n\
         Respond with a JSON object of the form \
         {{\"is_satisfactory\": true|false, \"missing_fields\": [\"field\", ...], \
         \"reasoning\": \"...\"}}. Use the schema's field names in missing_fields.",
        subject = subject(kind),
        focus = focus_list(focus),
    )
}

/// Asks whether a profile page belongs to the target.
pub fn profile_check(kind: TargetKind, info: &str, url: &str, content: &str) -> String {
    let evidence = match kind {
        TargetKind::Person => {
            "A matching profile shows this person's experience, education or skills. Profiles of \
             other people with the same name do not match."
        }
        TargetKind::Company => {
            "A matching page shows this company's overview, website, industry or size. Pages of \
             other companies with a similar name do not match."
        }
    };

    format!(
        "Decide whether a LinkedIn page belongs to the {subject} below.\n\n\
         <{subject}>\n{info}</{subject}>\n\n\
         <url>\n{url}\n</url>\n\n\
         <url_content>\n{content}\n</url_content>\n\n\
         {evidence}\n\n\
         Respond with {{\"result\": \"YES\"}} if the page belongs to the {subject}, otherwise \
         {{\"result\": \"NO\"}}.",
        subject = subject(kind),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prompt_states_the_exact_count() {
        let prompt = query_writing(TargetKind::Company, "NAME: Acme\n", "{}", 4);
        assert!(prompt.contains("exactly 4 distinct"));
        assert!(prompt.contains("<company>\nNAME: Acme\n</company>"));
        assert!(prompt.contains("linkedin.com/company"));
    }

    #[test]
    fn note_prompt_lists_focus_or_everything() {
        let focused = note_taking(TargetKind::Person, "NAME: Jane\n", "src", "{}", &["role".to_string()], "2025-01-01");
        assert!(focused.contains("Concentrate on these fields: role."));
        assert!(focused.contains("Today is 2025-01-01"));

        let open = note_taking(TargetKind::Person, "NAME: Jane\n", "src", "{}", &[], "2025-01-01");
        assert!(open.contains("Concentrate on these fields: all fields."));
    }

    #[test]
    fn review_prompt_mentions_stale_funding_for_companies() {
        let prompt = review(TargetKind::Company, "{}", "{}", &[], "2025-01-01");
        assert!(prompt.contains("funding information"));
        assert!(prompt.contains("missing_fields"));
    }
}
