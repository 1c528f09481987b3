//! Attribute trails for unknown/missing-attribute tracking (SPEC_FULL.md
//! §3.5, §4.8).
//!
//! Grounded directly on `attribute_trail_test.cc`: stepping an empty trail
//! stays empty (a value not rooted in a variable has no attribute path to
//! extend), while a trail rooted at a named variable grows a qualifier list
//! as selects/indexes are applied.

use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub enum Qualifier {
    Field(String),
    Index(i64),
    Key(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub root: String,
    pub qualifiers: Vec<Qualifier>,
}

impl Attribute {
    pub fn render(&self) -> String {
        let mut s = self.root.clone();
        for q in &self.qualifiers {
            match q {
                Qualifier::Field(f) => { s.push('.'); s.push_str(f); }
                Qualifier::Key(k) => { s.push('.'); s.push_str(k); }
                Qualifier::Index(i) => { s.push('['); s.push_str(&i.to_string()); s.push(']'); }
            }
        }
        s
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct AttributeTrail {
    attribute: Option<Rc<Attribute>>,
}

impl AttributeTrail {
    pub fn empty() -> Self {
        AttributeTrail { attribute: None }
    }

    pub fn rooted(name: impl Into<String>) -> Self {
        AttributeTrail { attribute: Some(Rc::new(Attribute { root: name.into(), qualifiers: Vec::new() })) }
    }

    pub fn is_empty(&self) -> bool {
        self.attribute.is_none()
    }

    pub fn attribute(&self) -> Option<&Attribute> {
        self.attribute.as_deref()
    }

    /// Extends the trail by one qualifier. Stepping an empty trail is a
    /// no-op that stays empty, matching `AttributeTrailEmptyStep`.
    pub fn step(&self, qualifier: Qualifier) -> AttributeTrail {
        match &self.attribute {
            None => AttributeTrail::empty(),
            Some(attr) => {
                let mut qualifiers = attr.qualifiers.clone();
                qualifiers.push(qualifier);
                AttributeTrail { attribute: Some(Rc::new(Attribute { root: attr.root.clone(), qualifiers })) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepping_an_empty_trail_stays_empty() {
        let trail = AttributeTrail::empty();
        let stepped = trail.step(Qualifier::Field("f".to_string()));
        assert!(stepped.is_empty());
    }

    #[test]
    fn rooted_trail_grows_a_qualifier_path() {
        let trail = AttributeTrail::rooted("x")
            .step(Qualifier::Field("f".to_string()))
            .step(Qualifier::Index(42))
            .step(Qualifier::Field("g".to_string()));
        assert_eq!(trail.attribute().unwrap().render(), "x.f[42].g");
    }

    #[test]
    fn map_key_qualifier_renders_unquoted() {
        let trail = AttributeTrail::rooted("m").step(Qualifier::Key("k".to_string()));
        assert_eq!(trail.attribute().unwrap().render(), "m.k");
    }

    #[test]
    fn stepping_preserves_the_original_trail() {
        let base = AttributeTrail::rooted("x");
        let extended = base.step(Qualifier::Field("f".to_string()));
        assert_eq!(base.attribute().unwrap().render(), "x");
        assert_eq!(extended.attribute().unwrap().render(), "x.f");
    }
}
