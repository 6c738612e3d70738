use tagwire::{
    resolve, try_resolve, Contract, ContractRegistry, ParseContext, SaveContext, Tag,
    UnresolvedContract, WireError,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Address {
    lot: i32,
    street: String,
}

impl Contract for Address {
    fn contract_id(&self) -> u32 {
        2
    }

    fn save(&self, ctx: &mut SaveContext) -> tagwire::Result<()> {
        ctx.save_int(1, self.lot);
        ctx.save_string(2, &self.street);
        Ok(())
    }

    fn parse(&mut self, ctx: &ParseContext<'_>) -> tagwire::Result<()> {
        self.lot = ctx.int(1)?;
        self.street = ctx.string(2)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Person {
    name: String,
    age: i32,
    address: Address,
}

impl Contract for Person {
    fn contract_id(&self) -> u32 {
        1
    }

    fn save(&self, ctx: &mut SaveContext) -> tagwire::Result<()> {
        ctx.save_string(1, &self.name);
        ctx.save_int(2, self.age);
        ctx.save_contract(3, &self.address)?;
        Ok(())
    }

    fn parse(&mut self, ctx: &ParseContext<'_>) -> tagwire::Result<()> {
        self.name = ctx.string(1)?;
        self.age = ctx.int(2)?;
        self.address = ctx.contract(3)?;
        Ok(())
    }
}

/// Carries an arbitrary payload contract without knowing its type.
#[derive(Debug, Default, Clone, PartialEq)]
struct Holder {
    tenant: UnresolvedContract,
}

impl Contract for Holder {
    fn contract_id(&self) -> u32 {
        3
    }

    fn save(&self, ctx: &mut SaveContext) -> tagwire::Result<()> {
        ctx.save_contract(1, &self.tenant)
    }

    fn parse(&mut self, ctx: &ParseContext<'_>) -> tagwire::Result<()> {
        self.tenant = ctx.unresolved(1)?;
        Ok(())
    }
}

// Same id as Person, different type: registration must conflict.
#[derive(Debug, Default)]
struct Impostor;

impl Contract for Impostor {
    fn contract_id(&self) -> u32 {
        1
    }

    fn save(&self, _ctx: &mut SaveContext) -> tagwire::Result<()> {
        Ok(())
    }

    fn parse(&mut self, _ctx: &ParseContext<'_>) -> tagwire::Result<()> {
        Ok(())
    }
}

fn kevin() -> Person {
    Person {
        name: "Kevin".to_string(),
        age: 37,
        address: Address {
            lot: 50,
            street: "50 Hampden Rd".to_string(),
        },
    }
}

#[test]
fn test_contract_round_trip() {
    let person = kevin();
    let mut buf = tagwire::encode(&person).unwrap();
    let decoded: Person = tagwire::decode(&mut buf).unwrap();
    assert_eq!(decoded, person);
    assert!(buf.is_empty());
}

#[test]
fn test_typed_decode_rejects_wrong_id() {
    let address = Address {
        lot: 1,
        street: "Elm".to_string(),
    };
    let mut buf = tagwire::encode(&address).unwrap();
    match tagwire::decode::<Person>(&mut buf) {
        Err(WireError::ContractTypeMismatch { expected, found }) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected ContractTypeMismatch, got {:?}", other),
    }
}

#[test]
fn test_registry_idempotent_reregistration() {
    let mut registry = ContractRegistry::new();
    registry.register::<Person>().unwrap();
    registry.register::<Person>().unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(1));
}

#[test]
fn test_registry_conflict_keeps_original_binding() {
    let mut registry = ContractRegistry::new();
    registry.register::<Person>().unwrap();
    match registry.register::<Impostor>() {
        Err(WireError::DuplicateContractId { id, existing, incoming }) => {
            assert_eq!(id, 1);
            assert!(existing.contains("Person"), "existing: {}", existing);
            assert!(incoming.contains("Impostor"), "incoming: {}", incoming);
        }
        other => panic!("expected DuplicateContractId, got {:?}", other),
    }
    // Original binding intact: the factory still produces a Person.
    let instance = registry.get(1).unwrap();
    assert!(resolve::<Person>(instance).is_ok());
}

#[test]
fn test_registry_lookup_misses() {
    let registry = ContractRegistry::new();
    assert!(!registry.contains(9));
    assert!(registry.try_get(9).is_none());
    assert!(matches!(registry.get(9), Err(WireError::NotFound(9))));
    assert!(registry.is_empty());
}

#[test]
fn test_parse_context_probes() {
    let person = kevin();
    let tag = Tag::from_contract(&person).unwrap();
    let ctx = ParseContext::new(tag.children().unwrap());

    assert!(ctx.has_field(1));
    assert!(!ctx.has_field(42));
    assert_eq!(ctx.try_string(1).as_deref(), Some("Kevin"));
    assert_eq!(ctx.try_int(2), Some(37));
    assert_eq!(ctx.try_int(42), None);
    // Wrong-typed probe: field 1 is a string, not an int.
    assert_eq!(ctx.try_int(1), None);

    assert!(matches!(ctx.int(42), Err(WireError::FieldNotFound(42))));
    match ctx.int(1) {
        Err(WireError::WireTypeMismatch {
            field_id,
            expected,
            found,
        }) => {
            assert_eq!(field_id, 1);
            assert_eq!(expected, tagwire::WireType::Int);
            assert_eq!(found, tagwire::WireType::String);
        }
        other => panic!("expected WireTypeMismatch, got {:?}", other),
    }
}

#[test]
fn test_nested_contract_id_checked_during_parse() {
    // A Person frame whose address child carries the wrong contract id.
    let mut ctx = SaveContext::new();
    ctx.save_string(1, "Kevin");
    ctx.save_int(2, 37);
    ctx.save_tag(3, Tag::contract(3, 77, Vec::new()));
    let children = ctx.into_children();

    let mut person = Person::default();
    match person.parse(&ParseContext::new(&children)) {
        Err(WireError::ContractTypeMismatch { expected, found }) => {
            assert_eq!(expected, 2);
            assert_eq!(found, 77);
        }
        other => panic!("expected ContractTypeMismatch, got {:?}", other),
    }
}

#[test]
fn test_unresolved_resolution_is_repeatable() {
    let address = Address {
        lot: 50,
        street: "50 Hampden Rd".to_string(),
    };
    let tag = Tag::from_contract(&address).unwrap();
    let unresolved =
        UnresolvedContract::new(tag.contract_id().unwrap(), tag.children().unwrap().to_vec());

    // Wrong candidate first, right one after; the source is never consumed.
    assert!(unresolved.try_resolve::<Person>().is_none());
    let first: Address = unresolved.resolve().unwrap();
    let second: Address = unresolved.resolve().unwrap();
    assert_eq!(first, address);
    assert_eq!(second, address);

    match unresolved.resolve::<Person>() {
        Err(WireError::UnresolvedMismatch { expected, found }) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected UnresolvedMismatch, got {:?}", other),
    }
}

#[test]
fn test_unresolved_relays_verbatim() {
    let address = Address {
        lot: 9,
        street: "Relay".to_string(),
    };
    let tag = Tag::from_contract(&address).unwrap();
    let unresolved =
        UnresolvedContract::new(tag.contract_id().unwrap(), tag.children().unwrap().to_vec());

    // Re-saving the unresolved contract reproduces the original tag tree.
    let relayed = Tag::from_contract(&unresolved).unwrap();
    assert_eq!(relayed, tag);

    // And the relayed bytes still decode into the concrete type.
    let mut buf = tagwire::encode(&unresolved).unwrap();
    let decoded: Address = tagwire::decode(&mut buf).unwrap();
    assert_eq!(decoded, address);
}

#[test]
fn test_resolve_passthrough_and_mismatch() {
    let boxed: Box<dyn Contract> = Box::new(kevin());
    let person = resolve::<Person>(boxed).unwrap();
    assert_eq!(person, kevin());

    // A concrete non-matching contract is not resolvable.
    let boxed: Box<dyn Contract> = Box::new(Address::default());
    match resolve::<Person>(boxed) {
        Err(WireError::UnresolvedMismatch { expected, found }) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected UnresolvedMismatch, got {:?}", other),
    }

    let boxed: Box<dyn Contract> = Box::new(Address::default());
    assert!(try_resolve::<Person>(boxed).is_none());
}

#[test]
fn test_holder_defers_payload_type() {
    let address = Address {
        lot: 50,
        street: "50 Hampden Rd".to_string(),
    };
    let payload_tag = Tag::from_contract(&address).unwrap();
    let holder = Holder {
        tenant: UnresolvedContract::new(
            payload_tag.contract_id().unwrap(),
            payload_tag.children().unwrap().to_vec(),
        ),
    };

    let mut buf = tagwire::encode(&holder).unwrap();
    let decoded: Holder = tagwire::decode(&mut buf).unwrap();
    assert_eq!(decoded, holder);

    // The payload resolves to the concrete type on demand.
    let resolved: Address = decoded.tenant.resolve().unwrap();
    assert_eq!(resolved, address);
    assert!(decoded.tenant.try_resolve::<Person>().is_none());
}

#[test]
fn test_save_tag_overwrites_field_id() {
    let mut ctx = SaveContext::new();
    ctx.save_tag(8, Tag::int(1, 5));
    let children = ctx.into_children();
    assert_eq!(children[0].field_id(), 8);
    assert_eq!(children[0].as_int(), Some(5));
}
