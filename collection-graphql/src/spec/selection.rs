//! Selection sets to requested field paths.

use std::collections::HashMap;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable;
use indexmap::IndexMap;
use indexmap::IndexSet;

use super::SpecError;
use super::arguments::decode_arguments;
use super::query_plan::QuerySanitizer;
use crate::compiler::UnionBinding;
use crate::json_ext::Object;
use crate::json_ext::deep_merge;
use crate::schema::RESERVED_PREFIX;

/// Field paths and nested queries requested by a selection set.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PlannedSelection {
    pub(crate) fields: IndexSet<String>,
    pub(crate) deep: IndexMap<String, Object>,
}

#[cfg(test)]
impl PlannedSelection {
    pub(crate) fn fields(&self) -> Vec<String> {
        self.fields.iter().cloned().collect()
    }
}

pub(crate) struct SelectionPlanner<'a> {
    document: &'a ExecutableDocument,
    variables: &'a Object,
    sanitizer: &'a dyn QuerySanitizer,
    recursion_limit: usize,
    unions: Option<&'a HashMap<Name, UnionBinding>>,
}

impl<'a> SelectionPlanner<'a> {
    pub(crate) fn new(
        document: &'a ExecutableDocument,
        variables: &'a Object,
        sanitizer: &'a dyn QuerySanitizer,
        recursion_limit: usize,
    ) -> Self {
        Self {
            document,
            variables,
            sanitizer,
            recursion_limit,
            unions: None,
        }
    }

    /// Also requests the discriminator next to every union field, so that the member of
    /// the related row can be resolved.
    pub(crate) fn with_unions(mut self, unions: &'a HashMap<Name, UnionBinding>) -> Self {
        self.unions = Some(unions);
        self
    }

    /// Plans `selection_set`, with paths relative to `prefix`.
    pub(crate) fn plan(
        &self,
        selection_set: &executable::SelectionSet,
        prefix: Option<&str>,
    ) -> Result<PlannedSelection, SpecError> {
        let mut planned = PlannedSelection::default();
        self.collect(selection_set, prefix, 0, &mut planned)?;
        Ok(planned)
    }

    fn collect(
        &self,
        selection_set: &executable::SelectionSet,
        prefix: Option<&str>,
        mut count: usize,
        planned: &mut PlannedSelection,
    ) -> Result<(), SpecError> {
        if count > self.recursion_limit {
            tracing::error!(
                "selection processing recursion limit({}) exceeded",
                self.recursion_limit
            );
            return Err(SpecError::RecursionLimitExceeded);
        }
        count += 1;

        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if field.name.starts_with(RESERVED_PREFIX)
                        || IncludeSkip::parse(&field.directives).should_skip(self.variables)
                    {
                        continue;
                    }
                    let path = match prefix {
                        Some(prefix) => format!("{prefix}.{}", field.name),
                        None => field.name.to_string(),
                    };

                    if !field.arguments.is_empty() {
                        let arguments = decode_arguments(&field.arguments, self.variables);
                        let options = self.sanitizer.sanitize(&arguments)?.deep_options();
                        if !options.is_empty() {
                            deep_merge(planned.deep.entry(path.clone()).or_default(), options);
                        }
                    }

                    if let Some(binding) = self
                        .unions
                        .and_then(|unions| unions.get(&field.selection_set.ty))
                    {
                        planned.fields.insert(match prefix {
                            Some(prefix) => format!("{prefix}.{}", binding.discriminator),
                            None => binding.discriminator.clone(),
                        });
                    }

                    if field.selection_set.selections.is_empty() {
                        planned.fields.insert(path);
                    } else {
                        self.collect(&field.selection_set, Some(&path), count, planned)?;
                    }
                }
                executable::Selection::InlineFragment(inline_fragment) => {
                    if IncludeSkip::parse(&inline_fragment.directives).should_skip(self.variables)
                    {
                        continue;
                    }
                    self.collect_fragment(
                        inline_fragment.type_condition.as_ref(),
                        &selection_set.ty,
                        &inline_fragment.selection_set,
                        prefix,
                        count,
                        planned,
                    )?;
                }
                executable::Selection::FragmentSpread(fragment_spread) => {
                    if IncludeSkip::parse(&fragment_spread.directives).should_skip(self.variables)
                    {
                        continue;
                    }
                    let Some(fragment) = fragment_spread.fragment_def(self.document) else {
                        continue;
                    };
                    self.collect_fragment(
                        Some(fragment.type_condition()),
                        &selection_set.ty,
                        &fragment.selection_set,
                        prefix,
                        count,
                        planned,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Fragments on a union member are requested as `prefix:Member`, fragments on the
    /// enclosing type itself are merged into it.
    fn collect_fragment(
        &self,
        type_condition: Option<&Name>,
        parent_type: &Name,
        selection_set: &executable::SelectionSet,
        prefix: Option<&str>,
        count: usize,
        planned: &mut PlannedSelection,
    ) -> Result<(), SpecError> {
        match (type_condition, prefix) {
            (Some(type_condition), _) if type_condition.starts_with(RESERVED_PREFIX) => Ok(()),
            (Some(type_condition), Some(prefix)) if type_condition != parent_type => {
                let member_prefix = format!("{prefix}:{type_condition}");
                self.collect(selection_set, Some(&member_prefix), count, planned)
            }
            _ => self.collect(selection_set, prefix, count, planned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Condition {
    Yes,
    No,
    Variable(String),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &executable::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in directives.iter() {
            if include.is_none() && directive.name == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        // Variables were validated along with the document
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }
}

impl Condition {
    pub(crate) fn parse(directive: &executable::Directive) -> Option<Self> {
        match directive.specified_argument_by_name("if")?.as_ref() {
            executable::Value::Boolean(true) => Some(Condition::Yes),
            executable::Value::Boolean(false) => Some(Condition::No),
            executable::Value::Variable(variable) => {
                Some(Condition::Variable(variable.as_str().to_owned()))
            }
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }
}
