//! Test case steps in the work item XML format.
//!
//! Azure DevOps stores the steps of a test case as an XML document in the
//! `Microsoft.VSTS.TCM.Steps` field:
//!
//! ```xml
//! <steps id="0" last="3">
//!   <step id="2" type="ActionStep">
//!     <parameterizedString isformatted="true">click pay</parameterizedString>
//!     <parameterizedString isformatted="true"/>
//!   </step>
//!   <step id="3" type="ActionStep">
//!     ...
//!   </step>
//! </steps>
//! ```
//!
//! The first `parameterizedString` is the action, the second the expected
//! result, which reports never carry.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

/// Work item field holding the steps document.
pub const STEPS_FIELD: &str = "Microsoft.VSTS.TCM.Steps";

/// Renders step descriptions as a steps document.
pub fn steps_xml(steps: &[String]) -> anyhow::Result<String> {
    let mut writer = Writer::new(Vec::new());

    // Step IDs start at 2; `last` is the highest ID in use.
    let last = steps.len() + 1;
    let mut root = BytesStart::new("steps");
    root.push_attribute(("id", "0"));
    root.push_attribute(("last", last.to_string().as_str()));
    writer.write_event(Event::Start(root))?;

    for (index, description) in steps.iter().enumerate() {
        let mut step = BytesStart::new("step");
        step.push_attribute(("id", (index + 2).to_string().as_str()));
        step.push_attribute(("type", "ActionStep"));
        writer.write_event(Event::Start(step))?;

        let mut action = BytesStart::new("parameterizedString");
        action.push_attribute(("isformatted", "true"));
        writer.write_event(Event::Start(action))?;
        writer.write_event(Event::Text(BytesText::new(description)))?;
        writer.write_event(Event::End(BytesEnd::new("parameterizedString")))?;

        let mut expected = BytesStart::new("parameterizedString");
        expected.push_attribute(("isformatted", "true"));
        writer.write_event(Event::Empty(expected))?;

        writer.write_event(Event::End(BytesEnd::new("step")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("steps")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_document() {
        let xml = steps_xml(&["click pay".to_string(), "confirm".to_string()]).unwrap();

        assert!(xml.starts_with(r#"<steps id="0" last="3">"#));
        assert!(xml.contains(
            r#"<step id="2" type="ActionStep"><parameterizedString isformatted="true">click pay</parameterizedString><parameterizedString isformatted="true"/></step>"#
        ));
        assert!(xml.contains(r#"<step id="3" type="ActionStep">"#));
        assert!(xml.ends_with("</steps>"));
    }

    #[test]
    fn test_empty_steps() {
        let xml = steps_xml(&[]).unwrap();
        assert_eq!(xml, r#"<steps id="0" last="1"></steps>"#);
    }

    #[test]
    fn test_markup_is_escaped() {
        let xml = steps_xml(&["check <b>total</b> & tax".to_string()]).unwrap();
        assert!(xml.contains("check &lt;b&gt;total&lt;/b&gt; &amp; tax"));
    }
}
